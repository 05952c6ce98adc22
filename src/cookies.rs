use std::sync::{Arc, Mutex};

/// The `Cookie` header value believed valid for the target host.
///
/// Owned by exactly one session and passed explicitly into the fetcher and
/// the continuity strategies; clones share the same underlying value.
#[derive(Debug, Clone, Default)]
pub struct CookieContext {
    inner: Arc<Mutex<Vec<(String, String)>>>,
}

impl CookieContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current `Cookie` header value, `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        let pairs = self.lock();
        if pairs.is_empty() {
            return None;
        }
        Some(
            pairs
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Replace the whole context with a raw `Cookie` header string, as
    /// pasted from a browser after a human solved the challenge.
    pub fn replace_with(&self, raw: &str) {
        let mut pairs = self.lock();
        pairs.clear();
        for part in raw.split(';') {
            if let Some(pair) = parse_pair(part) {
                upsert(&mut pairs, pair);
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Merge `Set-Cookie` values by name. Attributes (Path, Expires...) are dropped.
    /// Returns how many cookies were adopted.
    pub fn adopt_set_cookies(&self, set_cookies: &[String]) -> usize {
        let mut pairs = self.lock();
        let mut adopted = 0;
        for header in set_cookies {
            let first = header.split(';').next().unwrap_or_default();
            if let Some(pair) = parse_pair(first) {
                upsert(&mut pairs, pair);
                adopted += 1;
            }
        }
        adopted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, String)>> {
        // The guarded Vec is always left consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_pair(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn upsert(pairs: &mut Vec<(String, String)>, (name, value): (String, String)) {
    match pairs.iter_mut().find(|(n, _)| *n == name) {
        Some(existing) => existing.1 = value,
        None => pairs.push((name, value)),
    }
}
