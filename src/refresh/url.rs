//! Cache-busting request URLs

/// Issues strictly increasing `t` values even when the wall clock stalls
/// or steps backwards
#[derive(Debug, Default)]
pub struct CacheBuster {
    last: u64,
}

impl CacheBuster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_timestamp(&mut self, now_ms: u64) -> u64 {
        let next = now_ms.max(self.last.saturating_add(1));
        self.last = next;
        next
    }
}

/// Random component appended next to the timestamp
pub fn nonce() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Append `t=<ts>&r=<nonce>` to the query, keeping any fragment last
pub fn cache_busted_url(base: &str, timestamp: u64, nonce: &str) -> String {
    let (path, fragment) = match base.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (base, None),
    };
    let separator = if !path.contains('?') {
        "?"
    } else if path.ends_with('?') || path.ends_with('&') {
        ""
    } else {
        "&"
    };

    let mut url = format!("{}{}t={}&r={}", path, separator, timestamp, nonce);
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}
