use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::collections::HashMap;

use crate::urls::{create_url, string_to_numeric_char_reference};

// mailto header quoting: unreserved characters and `/` stay readable.
const MAILTO: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'/');

/// Entity-escape `&`, `<`, `>` and `"`
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Quote a string for use as an HTML attribute value
pub fn quote_attr(value: &str) -> String {
    format!("\"{}\"", escape_html(value))
}

/// Build an `<a href="...">label</a>` fragment.
///
/// The href is `base` plus the sorted, entity-joined query arguments
/// (`escape_args=false` leaves values as given); extra attributes render in
/// sorted order and are attribute-escaped unless `escape_attrs` is off.
/// The label is inserted as given, so pre-escape untrusted text.
pub fn create_html_link(
    base: &str,
    args: &HashMap<String, Value>,
    label: &str,
    attributes: &HashMap<String, String>,
    escape_args: bool,
    escape_attrs: bool,
) -> String {
    let href = create_url(base, args, escape_args);
    anchor(&href, label, attributes, escape_attrs)
}

fn anchor(
    href: &str,
    label: &str,
    attributes: &HashMap<String, String>,
    escape_attrs: bool,
) -> String {
    let mut out = format!("<a href=\"{}\"", href);

    let mut sorted: Vec<(&String, &String)> = attributes.iter().collect();
    sorted.sort();
    for (name, value) in sorted {
        let rendered = if escape_attrs {
            quote_attr(value)
        } else {
            format!("\"{}\"", value)
        };
        out.push_str(&format!(" {}={}", name, rendered));
    }

    out.push('>');
    out.push_str(label);
    out.push_str("</a>");
    out
}

/// How an email address is hidden from harvesters in generated markup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailObfuscation {
    /// Emit nothing at all
    Hidden,
    /// Ordinary readable mailto link
    Plain,
    /// Address written as `user [at] host [dot] tld` inside the href
    SpelledOut,
    /// Address bytes written as numeric character references
    NumericReference,
    /// Whole anchor emitted reversed inside a document.write script
    ReversedScript,
    /// No link; `@` and `.` replaced by images served from the site
    ImageSubstitution,
}

/// Optional mailto headers and link presentation
#[derive(Debug, Clone, Default)]
pub struct MailtoOptions {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    /// Visible link text; the address itself when absent
    pub link_label: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// Build an obfuscated `mailto:` fragment for `email`.
///
/// `site_url` is only used by [`EmailObfuscation::ImageSubstitution`] to
/// locate the `at`/`dot` images.
pub fn create_html_mailto(
    email: &str,
    options: &MailtoOptions,
    mode: EmailObfuscation,
    site_url: &str,
) -> String {
    if mode == EmailObfuscation::Hidden {
        return String::new();
    }

    if mode == EmailObfuscation::ImageSubstitution {
        let at = format!(
            "<img src=\"{}/img/at.gif\" alt=\" [at] \" style=\"vertical-align:baseline\" />",
            site_url
        );
        let dot = format!(
            "<img src=\"{}/img/dot.gif\" alt=\" [dot] \" style=\"vertical-align:bottom\" />",
            site_url
        );
        return email.replace('@', &at).replace('.', &dot);
    }

    let address = match mode {
        EmailObfuscation::SpelledOut => {
            email.replace('@', " [at] ").replace('.', " [dot] ")
        }
        EmailObfuscation::NumericReference => string_to_numeric_char_reference(email),
        _ => email.to_string(),
    };

    let mut href = format!("mailto:{}", address);
    let headers = mailto_headers(options);
    if !headers.is_empty() {
        href.push('?');
        href.push_str(&headers);
    }

    let label = options.link_label.as_deref().unwrap_or(email);
    let link = anchor(&href, label, &options.attributes, true);

    if mode == EmailObfuscation::ReversedScript {
        let reversed: String = link.chars().rev().collect();
        return format!(
            "<script language=\"JavaScript\" \
             type=\"text/javascript\">document.write('{}'.split(\"\").reverse().join(\"\"))</script>",
            reversed
        );
    }

    link
}

/// Encode the optional mailto headers, sorted by header name
fn mailto_headers(options: &MailtoOptions) -> String {
    let named = [
        ("bcc", options.bcc.as_deref()),
        ("body", options.body.as_deref()),
        ("cc", options.cc.as_deref()),
        ("subject", options.subject.as_deref()),
    ];

    named
        .iter()
        .filter_map(|(name, value)| {
            value.map(|value| {
                // mailto bodies require CRLF line endings.
                let crlf = value.replace('\n', "\r\n");
                format!("{}={}", name, utf8_percent_encode(&crlf, MAILTO))
            })
        })
        .collect::<Vec<_>>()
        .join("&amp;")
}
