//! URL templates with a single numeric placeholder.
//!
//! Placeholders use the `str.format` subset that segment URLs are usually
//! written with: `{}`, `{0}`, `{:d}`, `{:3}`, `{:03d}`. Literal braces are
//! written as `{{` and `}}`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::config::MAX_INDEX_WIDTH;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("placeholder not specified in URL template: {template}")]
    MissingPlaceholder { template: String },
    #[error("URL template contains more than one placeholder: {template}")]
    MultiplePlaceholders { template: String },
    #[error("URL template placeholder cannot contain a `.` character: {template}")]
    PlaceholderContainsDot { template: String },
    #[error("unsupported placeholder `{{{placeholder}}}` in URL template: {template}")]
    UnsupportedPlaceholder {
        placeholder: String,
        template: String,
    },
    #[error("unbalanced brace in URL template: {template}")]
    UnbalancedBrace { template: String },
    #[error("URL template does not produce a valid http(s) or file URL ({reason}): {template}")]
    InvalidUrl { template: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Padding {
    width: usize,
    zero: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    prefix: String,
    suffix: String,
    padding: Padding,
}

impl UrlTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut padding = None;
        let mut chars = raw.chars().peekable();

        while let Some(ch) = chars.next() {
            let target = if padding.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    target.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    target.push('}');
                }
                '}' => return Err(TemplateError::UnbalancedBrace { template: raw.into() }),
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(TemplateError::UnbalancedBrace {
                                    template: raw.into(),
                                })
                            }
                            Some(other) => field.push(other),
                        }
                    }
                    if padding.is_some() {
                        return Err(TemplateError::MultiplePlaceholders {
                            template: raw.into(),
                        });
                    }
                    padding = Some(parse_field(&field, raw)?);
                }
                other => target.push(other),
            }
        }

        let padding = padding.ok_or_else(|| TemplateError::MissingPlaceholder {
            template: raw.into(),
        })?;
        let template = Self {
            raw: raw.to_string(),
            prefix,
            suffix,
            padding,
        };
        template.check_url()?;
        Ok(template)
    }

    pub fn render(&self, index: u64) -> String {
        let width = self.padding.width;
        let number = if self.padding.zero {
            format!("{index:0width$}")
        } else {
            format!("{index:>width$}")
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn check_url(&self) -> Result<(), TemplateError> {
        let sample = self.render(0);
        let parsed = Url::parse(&sample).map_err(|err| TemplateError::InvalidUrl {
            template: self.raw.clone(),
            reason: err.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" | "file" => Ok(()),
            scheme => Err(TemplateError::InvalidUrl {
                template: self.raw.clone(),
                reason: format!("unsupported scheme `{scheme}`"),
            }),
        }
    }
}

impl fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn format_spec() -> &'static Regex {
    static SPEC: OnceLock<Regex> = OnceLock::new();
    SPEC.get_or_init(|| Regex::new(r"^(0?)(\d*)d?$").expect("valid regex"))
}

fn parse_field(field: &str, template: &str) -> Result<Padding, TemplateError> {
    if field.contains('.') {
        return Err(TemplateError::PlaceholderContainsDot {
            template: template.into(),
        });
    }
    let unsupported = || TemplateError::UnsupportedPlaceholder {
        placeholder: field.to_string(),
        template: template.to_string(),
    };
    let (name, spec) = field.split_once(':').unwrap_or((field, ""));
    if !(name.is_empty() || name == "0") {
        return Err(unsupported());
    }
    let captures = format_spec().captures(spec).ok_or_else(unsupported)?;
    let zero = !captures[1].is_empty();
    let width = match &captures[2] {
        "" => 0,
        digits => digits.parse().map_err(|_| unsupported())?,
    };
    if width > MAX_INDEX_WIDTH {
        return Err(unsupported());
    }
    Ok(Padding { width, zero })
}
