use std::fmt;
use std::str::FromStr;

use strarc_format::{OverwritePolicy, Policy, MIN_BUFFER_SIZE};

#[derive(Debug)]
pub struct ParseOptionError(String);

impl std::error::Error for ParseOptionError {}

impl fmt::Display for ParseOptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parses a byte count with an optional `K` or `M` suffix.
pub fn parse_buffer_size(src: &str) -> Result<usize, ParseOptionError> {
    let src = src.trim();
    let (digits, scale) = match src.char_indices().last() {
        Some((i, 'k')) | Some((i, 'K')) => (&src[..i], 1024),
        Some((i, 'm')) | Some((i, 'M')) => (&src[..i], 1024 * 1024),
        _ => (src, 1),
    };

    let size = digits
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(scale))
        .ok_or_else(|| ParseOptionError(format!("Invalid buffer size: {}", src)))?;

    if size < MIN_BUFFER_SIZE {
        return Err(ParseOptionError(format!(
            "Buffer size must be at least {}K",
            MIN_BUFFER_SIZE / 1024
        )));
    }
    Ok(size)
}

/// Processing that `-s` switches off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Skip {
    pub attributes: bool,
    pub compression: bool,
    pub links: bool,
    pub security: bool,
    pub times: bool,
    pub short_names: bool,
}

impl Skip {
    pub fn apply(&self, policy: &mut Policy) {
        policy.attributes &= !self.attributes;
        policy.compression &= !self.compression;
        policy.hard_links &= !self.links;
        policy.security &= !self.security;
        policy.times &= !self.times;
        policy.short_names &= !self.short_names;
    }
}

impl FromStr for Skip {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut skip = Skip::default();
        for c in s.chars() {
            match c.to_ascii_lowercase() {
                'a' => skip.attributes = true,
                'c' => skip.compression = true,
                'l' => skip.links = true,
                's' => skip.security = true,
                't' => skip.times = true,
                'n' => skip.short_names = true,
                c => return Err(ParseOptionError(format!("Unknown skip flag: {}", c))),
            }
        }
        Ok(skip)
    }
}

/// Builds the overwrite policy for `-o`. A bare `-o` replaces everything;
/// `a` keeps objects modified since their last backup, `n` keeps objects
/// that are not older, and `f` restores only objects that already exist.
pub fn overwrite_policy(flags: Option<&str>) -> Result<OverwritePolicy, ParseOptionError> {
    let mut policy = OverwritePolicy {
        existing: true,
        ..OverwritePolicy::default()
    };

    for c in flags.unwrap_or_default().chars() {
        match c.to_ascii_lowercase() {
            'a' => policy.unmodified_only = true,
            'n' => policy.older_only = true,
            'f' => policy.freshen_only = true,
            c => return Err(ParseOptionError(format!("Unknown overwrite flag: {}", c))),
        }
    }
    Ok(policy)
}

/// Splits comma separated `-i`/`-e` lists.
pub fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sizes() {
        assert_eq!(parse_buffer_size("64K").unwrap(), 65536);
        assert_eq!(parse_buffer_size("2m").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_buffer_size("131072").unwrap(), 131072);
        assert!(parse_buffer_size("63K").is_err());
        assert!(parse_buffer_size("K").is_err());
        assert!(parse_buffer_size("lots").is_err());
    }

    #[test]
    fn skip_flags() {
        let skip: Skip = "sT".parse().unwrap();
        assert!(skip.security && skip.times);
        assert!(!skip.links);
        assert!("q".parse::<Skip>().is_err());

        let mut policy = Policy::default();
        "ln".parse::<Skip>().unwrap().apply(&mut policy);
        assert!(!policy.hard_links);
        assert!(!policy.short_names);
        assert!(policy.security);
    }

    #[test]
    fn overwrite_flags() {
        let bare = overwrite_policy(None).unwrap();
        assert!(bare.existing && !bare.is_conditional());

        let policy = overwrite_policy(Some("af")).unwrap();
        assert!(policy.unmodified_only && policy.freshen_only);
        assert!(!policy.older_only);
        assert!(overwrite_policy(Some("x")).is_err());
    }

    #[test]
    fn lists_are_split_on_commas() {
        let values = vec!["a,b".to_string(), " c ,".to_string()];
        assert_eq!(split_list(&values), vec!["a", "b", "c"]);
    }
}
