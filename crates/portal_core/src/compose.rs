use std::fmt::Write as _;

use shared::{domain::WindowState, html::escape};

use crate::registry::{PortletRegistry, PortletRuntimeContext};

/// Renders the current layout: frames in declared order, windows in declared
/// order. Minimized windows collapse to their title bar. Producer markup is
/// inserted verbatim.
pub fn compose_page(registry: &PortletRegistry, path: Option<&str>) -> String {
    let mut html = String::new();
    let _ = write!(html, "<div class=\"portal-page\"");
    if let Some(path) = path {
        let _ = write!(html, " data-path=\"{}\"", escape(path));
    }
    html.push_str(">\n");

    for (position, frame) in registry.layout().frames() {
        let _ = writeln!(
            html,
            "  <div class=\"portal-frame portal-frame-{position} portal-style-{}\">",
            frame.style
        );
        for key in &frame.windows {
            if let Some(context) = registry.get(key) {
                compose_window(&mut html, context);
            }
        }
        html.push_str("  </div>\n");
    }

    html.push_str("</div>\n");
    html
}

fn compose_window(html: &mut String, context: &PortletRuntimeContext) {
    let mut classes = String::from("portal-window");
    if context.display.border {
        classes.push_str(" portal-border");
    }
    if let Some(theme) = &context.theme {
        let _ = write!(classes, " portal-theme-{}", escape(theme));
    }
    let _ = writeln!(
        html,
        "    <div class=\"{classes}\" id=\"{}\" data-state=\"{}\" data-mode=\"{}\">",
        escape(&context.key.to_string()),
        context.window_state,
        context.mode
    );

    if context.display.title_bar || context.window_state == WindowState::Minimized {
        let _ = writeln!(
            html,
            "      <div class=\"portal-title\">{}</div>",
            escape(context.title())
        );
    }
    if context.window_state != WindowState::Minimized {
        let _ = writeln!(
            html,
            "      <div class=\"portal-body\">{}</div>",
            context.markup.as_deref().unwrap_or_default()
        );
    }
    if context.display.status_bar {
        if let Some(message) = &context.message {
            let _ = writeln!(
                html,
                "      <div class=\"portal-status portal-status-{}\">{}</div>",
                context.status,
                escape(message)
            );
        }
    }

    html.push_str("    </div>\n");
}

/// Minimal page shown when navigation fails.
pub fn compose_error_page(message: &str) -> String {
    format!(
        "<div class=\"portal-page portal-error\">\n  <h1>Page unavailable</h1>\n  <p>{}</p>\n</div>\n",
        escape(message)
    )
}
