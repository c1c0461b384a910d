//! HTML login page shown while an authorization request is parked.

/// Render the login form posting to `action`.
///
/// All interpolated values are HTML-escaped to prevent XSS.
pub fn render_login_page(action: &str, client_id: Option<&str>, error_message: Option<&str>) -> String {
    let error_html = error_message
        .map(|msg| {
            format!(
                r#"<div style="background:#fee;border:1px solid #c00;color:#c00;padding:10px;border-radius:4px;margin-bottom:16px">{}</div>"#,
                html_escape(msg)
            )
        })
        .unwrap_or_default();

    let subtitle = client_id.map_or_else(
        || "Sign in to continue".to_string(),
        |id| format!("<strong>{}</strong> is requesting access", html_escape(id)),
    );

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Sign in - authz-server</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }}
.card {{ background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 400px; width: 100%; }}
h1 {{ font-size: 20px; margin: 0 0 8px; color: #333; }}
.subtitle {{ color: #666; font-size: 14px; margin: 0 0 24px; }}
label {{ display: block; font-size: 14px; font-weight: 500; margin: 12px 0 6px; color: #333; }}
input {{ width: 100%; padding: 10px; border: 1px solid #ddd; border-radius: 4px; font-size: 14px; box-sizing: border-box; }}
button {{ width: 100%; padding: 10px; background: #4a90d9; color: #fff; border: none; border-radius: 4px; font-size: 14px; font-weight: 500; cursor: pointer; margin-top: 16px; }}
button:hover {{ background: #357abd; }}
</style>
</head>
<body>
<div class="card">
<h1>Sign in</h1>
<p class="subtitle">{subtitle}</p>
{error_html}
<form method="POST" action="{action_escaped}">
<label for="username">Username</label>
<input type="text" id="username" name="username" autocomplete="username" required autofocus>
<label for="password">Password</label>
<input type="password" id="password" name="password" autocomplete="current-password" required>
<button type="submit">Sign in</button>
</form>
</div>
</body>
</html>"#,
        subtitle = subtitle,
        error_html = error_html,
        action_escaped = html_escape(action),
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("xss")</script>"#),
            "&lt;script&gt;alert(&quot;xss&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_render_for_pending_client() {
        let html = render_login_page("/login", Some("grafana_id"), None);
        assert!(html.contains("<strong>grafana_id</strong> is requesting access"));
        assert!(html.contains(r#"action="/login""#));
        assert!(!html.contains("background:#fee"));
    }

    #[test]
    fn test_render_with_error_escapes_client() {
        let html = render_login_page("/login", Some("<b>x</b>"), Some("Invalid username or password"));
        assert!(html.contains("Invalid username or password"));
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(html.contains("Sign in"));
    }
}
