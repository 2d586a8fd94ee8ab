//! Placeholder substitution for notification subjects and bodies.
//!
//! Recognised tokens: `{{BUTTON_TEXT}}`, `{{TIMESTAMP}}`, `{{URL}}`.
//! Every occurrence is replaced in a single left-to-right pass, so text
//! coming from a substituted value is never substituted again. Token text
//! that survives anyway (a scraped value containing `{{URL}}`) is stripped,
//! so rendered output never carries a recognised token.

/// Values bound to the template tokens.
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    pub button_text: &'a str,
    pub timestamp: &'a str,
    pub url: &'a str,
}

impl<'a> TemplateVars<'a> {
    fn lookup(&self, token: &str) -> Option<&'a str> {
        match token {
            "{{BUTTON_TEXT}}" => Some(self.button_text),
            "{{TIMESTAMP}}" => Some(self.timestamp),
            "{{URL}}" => Some(self.url),
            _ => None,
        }
    }
}

const TOKENS: [&str; 3] = ["{{BUTTON_TEXT}}", "{{TIMESTAMP}}", "{{URL}}"];

/// Render `template`, replacing every known token with its value.
/// Unknown `{{...}}` sequences are copied through untouched.
pub fn render(template: &str, vars: &TemplateVars<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match TOKENS.iter().find(|t| tail.starts_with(**t)) {
            Some(token) => {
                // lookup covers every entry of TOKENS
                out.push_str(vars.lookup(token).unwrap_or_default());
                rest = &tail[token.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    strip_tokens(out)
}

/// Remove recognised tokens left in rendered text until none remain.
fn strip_tokens(mut text: String) -> String {
    while let Some(token) = TOKENS.iter().find(|t| text.contains(**t)) {
        text = text.replace(*token, "");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> TemplateVars<'static> {
        TemplateVars {
            button_text: "Book Now",
            timestamp: "2026-10-16 09:30:00",
            url: "https://example.com/slots",
        }
    }

    #[test]
    fn test_replaces_all_three_tokens() {
        let out = render("{{BUTTON_TEXT}} at {{TIMESTAMP}} on {{URL}}", &vars());
        assert_eq!(out, "Book Now at 2026-10-16 09:30:00 on https://example.com/slots");
    }

    #[test]
    fn test_replaces_every_occurrence() {
        let out = render("<a href=\"{{URL}}\">{{URL}}</a>", &vars());
        assert_eq!(
            out,
            "<a href=\"https://example.com/slots\">https://example.com/slots</a>"
        );
    }

    #[test]
    fn test_order_does_not_matter() {
        let a = render("{{URL}}|{{TIMESTAMP}}|{{BUTTON_TEXT}}", &vars());
        let b = render("{{BUTTON_TEXT}}|{{TIMESTAMP}}|{{URL}}", &vars());
        let mut a_parts: Vec<&str> = a.split('|').collect();
        let mut b_parts: Vec<&str> = b.split('|').collect();
        a_parts.sort();
        b_parts.sort();
        assert_eq!(a_parts, b_parts);
    }

    #[test]
    fn test_no_tokens_left_after_render() {
        let out = render("{{BUTTON_TEXT}}{{TIMESTAMP}}{{URL}}{{URL}}", &vars());
        for token in TOKENS {
            assert!(!out.contains(token), "{token} left in {out}");
        }
    }

    #[test]
    fn test_token_inside_value_is_stripped_not_substituted() {
        let tricky = TemplateVars {
            button_text: "Book {{URL}} Now",
            timestamp: "t",
            url: "u",
        };
        assert_eq!(render("[{{BUTTON_TEXT}}]", &tricky), "[Book  Now]");
    }

    #[test]
    fn test_tokens_formed_across_value_boundary_are_stripped() {
        let nested = TemplateVars {
            button_text: "{{UR{{URL}}L}}",
            timestamp: "t",
            url: "u",
        };
        assert_eq!(render("[{{BUTTON_TEXT}}]", &nested), "[]");

        let split = TemplateVars {
            button_text: "{{UR",
            timestamp: "t",
            url: "u",
        };
        let out = render("[{{BUTTON_TEXT}}L}}]", &split);
        assert_eq!(out, "[]");
        for token in TOKENS {
            assert!(!out.contains(token));
        }
    }

    #[test]
    fn test_rendering_is_idempotent_on_output() {
        let once = render("Open: {{BUTTON_TEXT}} {{URL}}", &vars());
        let twice = render(&once, &vars());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unknown_and_partial_tokens_pass_through() {
        let out = render("{{NAME}} {{URL {URL}} {{", &vars());
        assert_eq!(out, "{{NAME}} {{URL {URL}} {{");
    }

    #[test]
    fn test_multibyte_text_around_tokens() {
        let out = render("🎉 {{BUTTON_TEXT}} — दर्शन", &vars());
        assert_eq!(out, "🎉 Book Now — दर्शन");
    }
}
