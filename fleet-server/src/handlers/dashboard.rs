//! `/` and `/dashboard` (§4.6). A full dashboard UI is out of scope
//! (NON-GOALS) — this serves a minimal static shell that pulls its data from
//! the JSON endpoints client-side, so there's something to point a browser
//! at without building a frontend.

use axum::response::Html;

const SHELL: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>ATLAS fleet</title></head>
<body>
<h1>ATLAS fleet</h1>
<p>Dashboard data lives at <code>/api/fleet/summary</code>, <code>/api/fleet/machines</code>,
and <code>/api/fleet/speedtest/*</code>. This shell intentionally ships no JS framework —
wire up a client against those endpoints.</p>
</body>
</html>"#;

pub async fn index() -> Html<&'static str> {
    Html(SHELL)
}

pub async fn dashboard() -> Html<&'static str> {
    Html(SHELL)
}
