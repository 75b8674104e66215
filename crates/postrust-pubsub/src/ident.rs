//! Channel-name mangling for the internal lock namespace.
//!
//! User channel `X` maps to the internal channel `__<tag>__:X`. The
//! namespace separation guarantees internal lock-release notifications
//! never collide with user channels.

use regex::Regex;

/// Mangles and recognizes channel names in the `__<tag>__:` namespace.
#[derive(Clone, Debug)]
pub struct ChannelMangler {
    tag: String,
    prefix: String,
    scrub: Regex,
}

impl ChannelMangler {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        let prefix = format!("__{tag}__:");
        let scrub =
            Regex::new(&format!("^__{}__:", regex::escape(&tag))).expect("static pattern is valid");
        Self { tag, prefix, scrub }
    }

    /// The raw lock tag (e.g. `pgip_lock`).
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Map a user channel name to its internal, mangled name.
    pub fn mangle(&self, channel: &str) -> String {
        format!("{}{}", self.prefix, channel)
    }

    /// Whether `channel` lives in this mangler's internal namespace.
    pub fn is_internal(&self, channel: &str) -> bool {
        self.scrub.is_match(channel)
    }

    /// Strip the internal prefix, if present. Channels outside the
    /// namespace are returned unchanged.
    pub fn unmangle<'a>(&self, channel: &'a str) -> &'a str {
        match self.scrub.find(channel) {
            Some(m) => &channel[m.end()..],
            None => channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mangle_unmangle_round_trip() {
        let mangler = ChannelMangler::new("pgip_lock");
        let mangled = mangler.mangle("orders");
        assert_eq!(mangled, "__pgip_lock__:orders");
        assert_eq!(mangler.unmangle(&mangled), "orders");
    }

    #[test]
    fn test_is_internal() {
        let mangler = ChannelMangler::new("pgip_lock");
        assert!(mangler.is_internal("__pgip_lock__:orders"));
        assert!(!mangler.is_internal("orders"));
        assert!(!mangler.is_internal("__other_tag__:orders"));
    }

    #[test]
    fn test_unmangle_passthrough_for_user_channel() {
        let mangler = ChannelMangler::new("pgip_lock");
        assert_eq!(mangler.unmangle("orders"), "orders");
    }

    #[test]
    fn test_tag_is_regex_escaped() {
        // A tag containing regex metacharacters must not change matching semantics.
        let mangler = ChannelMangler::new("a.b");
        assert!(mangler.is_internal("__a.b__:x"));
        assert!(!mangler.is_internal("__aXb__:x"));
    }
}
