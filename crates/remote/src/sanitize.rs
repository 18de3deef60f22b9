//! Scrubbing remote host identifiers from caller-visible text.

/// Replaces every configured host identifier with a placeholder.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    /// Longest first, so a host that contains another is replaced whole.
    hosts: Vec<String>,
    placeholder: String,
}

impl Sanitizer {
    pub fn new<I, S>(hosts: I, placeholder: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hosts: Vec<String> = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        hosts.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        hosts.dedup();
        Self {
            hosts,
            placeholder: placeholder.into(),
        }
    }

    /// Replace host occurrences in one left-to-right pass over `message`.
    ///
    /// Matches are taken from the input only, never from inserted placeholders.
    pub fn sanitize(&self, message: &str) -> String {
        if self.hosts.is_empty() {
            return message.to_string();
        }
        let mut out = String::with_capacity(message.len());
        let mut rest = message;
        while let Some(c) = rest.chars().next() {
            match self.hosts.iter().find(|h| rest.starts_with(h.as_str())) {
                Some(host) => {
                    out.push_str(&self.placeholder);
                    rest = &rest[host.len()..];
                }
                None => {
                    out.push(c);
                    rest = &rest[c.len_utf8()..];
                }
            }
        }
        out
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }
}
