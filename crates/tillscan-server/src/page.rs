//! Embedded HTML served to handsets. No build step, no asset pipeline.

use std::time::Duration;

use crate::routes::SUBMIT_PATH;

/// Landing page at `/`. A meta refresh instead of a 3xx keeps hand-typed
/// `http://host:port` entries working in every mobile browser.
pub const INDEX_REDIRECT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0; url=/scan">
<title>tillscan</title>
</head>
<body>
<p>Continue to <a href="/scan">the scanner</a>.</p>
</body>
</html>
"#;

/// Scanner page template. `{cooldown_ms}` and `{submit_path}` are filled
/// in by [`render_scan_page`].
const SCAN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>tillscan</title>
<style>
body { font-family: system-ui, sans-serif; margin: 0; background: #111; color: #eee; }
main { max-width: 28rem; margin: 0 auto; padding: 1rem; }
h1 { font-size: 1.2rem; }
video { width: 100%; border-radius: 0.5rem; background: #000; }
form { display: flex; gap: 0.5rem; margin-top: 1rem; }
input { flex: 1; font-size: 1.1rem; padding: 0.5rem; }
button { font-size: 1.1rem; padding: 0.5rem 1rem; }
p.status { min-height: 1.5rem; }
</style>
</head>
<body>
<main>
<h1>Scan a barcode</h1>
<video id="preview" autoplay playsinline muted></video>
<p class="status" id="status">Starting camera&hellip;</p>
<form id="manual">
<input id="code" inputmode="numeric" pattern="[0-9]*" placeholder="Or type the 13 digits" autocomplete="off">
<button type="submit">Send</button>
</form>
</main>
<script>
const COOLDOWN_MS = {cooldown_ms};
const SUBMIT_PATH = "{submit_path}";
let lastCode = null;
let lastAcceptedAt = 0;

function setStatus(text) {
  document.getElementById("status").textContent = text;
}

function coolingDown(code) {
  const now = Date.now();
  if (code === lastCode && now - lastAcceptedAt < COOLDOWN_MS) {
    return true;
  }
  lastCode = code;
  lastAcceptedAt = now;
  return false;
}

async function submit(code) {
  if (!code || coolingDown(code)) {
    return;
  }
  try {
    const resp = await fetch(SUBMIT_PATH, {
      method: "POST",
      headers: { "Content-Type": "text/plain" },
      body: code,
    });
    const body = await resp.json();
    setStatus(body.processed ? "Sent " + body.barcode : "Received " + (body.barcode || "nothing"));
  } catch (err) {
    setStatus("Send failed: " + err);
  }
}

document.getElementById("manual").addEventListener("submit", (event) => {
  event.preventDefault();
  const field = document.getElementById("code");
  submit(field.value.trim());
  field.value = "";
});

async function startCamera() {
  if (!("BarcodeDetector" in window)) {
    setStatus("No barcode detector in this browser. Use the field below.");
    return;
  }
  const video = document.getElementById("preview");
  try {
    const stream = await navigator.mediaDevices.getUserMedia({
      video: { facingMode: "environment" },
      audio: false,
    });
    video.srcObject = stream;
  } catch (err) {
    setStatus("Camera unavailable: " + err + ". Use the field below.");
    return;
  }
  const detector = new BarcodeDetector({ formats: ["ean_13"] });
  setStatus("Point the camera at a barcode.");
  const tick = async () => {
    if (video.readyState >= 2) {
      try {
        const found = await detector.detect(video);
        for (const hit of found) {
          submit(hit.rawValue);
        }
      } catch (err) {
        // Transient detector errors, keep polling.
      }
    }
    setTimeout(tick, 150);
  };
  tick();
}

startCamera();
</script>
</body>
</html>
"#;

/// Fills the scanner template with the configured resubmission window.
pub(crate) fn render_scan_page(cooldown: Duration) -> String {
    SCAN_PAGE
        .replace("{cooldown_ms}", &cooldown.as_millis().to_string())
        .replace("{submit_path}", SUBMIT_PATH)
}
