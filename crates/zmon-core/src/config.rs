// ── Device actor configuration ──
//
// The actor is configured with a ZPL (ZeroMQ Property Language) text blob.
// Entries are `name` or `name = value`, nested by four-space indentation;
// values are looked up by slash-separated paths such as
// `malamute/endpoint`. Every CONFIG replaces the whole tree.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::CoreError;

/// Broker endpoint to connect to.
pub const ENDPOINT_PATH: &str = "malamute/endpoint";
/// Identity (mailbox address) of the actor on the broker.
pub const ADDRESS_PATH: &str = "malamute/address";
/// Stream on which device changes are published.
pub const PRODUCER_PATH: &str = "malamute/producer";
/// Parent of the `<stream> = <pattern>` consumer entries.
pub const CONSUMER_PATH: &str = "malamute/consumer";
/// Device registry persistence file.
pub const FILE_PATH: &str = "server/file";

const INDENT: usize = 4;

// ── ConfigNode ───────────────────────────────────────────────────────

/// One entry of the configuration tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNode {
    name: String,
    value: Option<String>,
    children: Vec<ConfigNode>,
}

impl ConfigNode {
    fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Self {
            name: name.into(),
            value,
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// First direct child called `name`.
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Walk a slash-separated path from this node.
    pub fn locate(&self, path: &str) -> Option<&ConfigNode> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Value at `path`, or `None` if the entry is missing or has no value.
    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.locate(path)?.value()
    }

    fn write_zpl(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:width$}{}", "", self.name, width = depth * INDENT)?;
        match self.value.as_deref() {
            Some(value) if value.contains('"') => writeln!(f, " = '{value}'")?,
            Some(value) => writeln!(f, " = \"{value}\"")?,
            None => writeln!(f)?,
        }
        self.children
            .iter()
            .try_for_each(|child| child.write_zpl(depth + 1, f))
    }
}

// ── Consumer ─────────────────────────────────────────────────────────

/// A (stream, pattern) subscription derived from `malamute/consumer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub stream: String,
    pub pattern: String,
}

// ── ConfigTree ───────────────────────────────────────────────────────

/// A parsed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTree {
    root: ConfigNode,
}

impl ConfigTree {
    /// Parse ZPL text. Fails on the first malformed line.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        let mut root = ConfigNode::new("root", None);
        // Child indices from the root down to the most recent entry.
        let mut cursor: Vec<usize> = Vec::new();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end();
            let content = line.trim_start_matches(' ');

            if content.is_empty() || content.starts_with('#') {
                continue;
            }
            if content.starts_with('\t') {
                return Err(parse_error(line_no, "tabs are not allowed for indentation"));
            }

            let indent = line.len() - content.len();
            if indent % INDENT != 0 {
                return Err(parse_error(
                    line_no,
                    format!("indentation must be a multiple of {INDENT} spaces"),
                ));
            }
            let level = indent / INDENT;
            if level > cursor.len() {
                return Err(parse_error(line_no, "entry is indented too deeply"));
            }

            let (name, value) = parse_entry(content).map_err(|reason| parse_error(line_no, reason))?;

            cursor.truncate(level);
            let parent = node_at_mut(&mut root, &cursor);
            parent.children.push(ConfigNode::new(name, value));
            cursor.push(parent.children.len() - 1);
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &ConfigNode {
        &self.root
    }

    pub fn locate(&self, path: &str) -> Option<&ConfigNode> {
        self.root.locate(path)
    }

    pub fn resolve(&self, path: &str) -> Option<&str> {
        self.root.resolve(path)
    }

    /// Set the value at `path`, creating missing entries along the way.
    pub fn put(&mut self, path: &str, value: impl Into<String>) {
        let mut node = &mut self.root;
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            let index = match node.children.iter().position(|child| child.name == segment) {
                Some(index) => index,
                None => {
                    node.children.push(ConfigNode::new(segment, None));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[index];
        }
        node.value = Some(value.into());
    }

    // ── Well-known paths ─────────────────────────────────────────────

    pub fn endpoint(&self) -> Option<&str> {
        self.resolve(ENDPOINT_PATH)
    }

    pub fn address(&self) -> Option<&str> {
        self.resolve(ADDRESS_PATH)
    }

    pub fn producer(&self) -> Option<&str> {
        self.resolve(PRODUCER_PATH)
    }

    pub fn file(&self) -> Option<&Path> {
        self.resolve(FILE_PATH).map(Path::new)
    }

    /// Enumerate the consumer subscriptions.
    ///
    /// Built fresh on every call. A stream listed twice keeps its first
    /// pattern; an entry without a value subscribes with an empty pattern.
    pub fn consumers(&self) -> Vec<Consumer> {
        let mut consumers: Vec<Consumer> = Vec::new();
        let Some(parent) = self.locate(CONSUMER_PATH) else {
            return consumers;
        };

        for child in parent.children() {
            if consumers.iter().any(|c| c.stream == child.name()) {
                continue;
            }
            consumers.push(Consumer {
                stream: child.name().to_owned(),
                pattern: child.value().unwrap_or_default().to_owned(),
            });
        }
        consumers
    }
}

/// Renders the tree back to ZPL text, quoting every value.
impl fmt::Display for ConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root
            .children
            .iter()
            .try_for_each(|child| child.write_zpl(0, f))
    }
}

impl FromStr for ConfigTree {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Parsing helpers ──────────────────────────────────────────────────

fn parse_error(line: usize, reason: impl Into<String>) -> CoreError {
    CoreError::ConfigParse {
        line,
        reason: reason.into(),
    }
}

fn node_at_mut<'a>(root: &'a mut ConfigNode, cursor: &[usize]) -> &'a mut ConfigNode {
    cursor
        .iter()
        .fold(root, |node, &index| &mut node.children[index])
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "$-_@.&+/".contains(c)
}

/// Split `name [= value] [# comment]` into its parts.
fn parse_entry(content: &str) -> Result<(String, Option<String>), String> {
    let name_len = content
        .find(|c: char| !is_name_char(c))
        .unwrap_or(content.len());
    if name_len == 0 {
        return Err(format!("invalid entry name in '{content}'"));
    }
    let (name, rest) = content.split_at(name_len);
    let rest = rest.trim_start();

    if rest.is_empty() || rest.starts_with('#') {
        return Ok((name.to_owned(), None));
    }
    let Some(value) = rest.strip_prefix('=') else {
        return Err(format!("expected '=' after '{name}'"));
    };
    parse_value(value.trim_start()).map(|value| (name.to_owned(), Some(value)))
}

fn parse_value(text: &str) -> Result<String, String> {
    if text.is_empty() || text.starts_with('#') {
        return Err("missing value after '='".into());
    }

    if let Some(quote) = text.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let body = &text[1..];
        let Some(end) = body.find(quote) else {
            return Err("unterminated quoted value".into());
        };
        let trailing = body[end + 1..].trim_start();
        if !trailing.is_empty() && !trailing.starts_with('#') {
            return Err("unexpected text after quoted value".into());
        }
        return Ok(body[..end].to_owned());
    }

    // A bare value runs until a comment introduced by whitespace.
    let end = text
        .char_indices()
        .find(|&(i, c)| c == '#' && text[..i].ends_with(char::is_whitespace))
        .map_or(text.len(), |(i, _)| i);
    Ok(text[..end].trim_end().to_owned())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
# zm-device configuration
server
    file = /var/lib/zmon/devices.json
malamute
    endpoint = inproc://zm-device-test
    address = it.zmon.device   # mailbox identity
    consumer
        _DEVICES = .*
        _METRICS = \"^cpu#load\"
    producer = _DEVICES
";

    #[test]
    fn resolves_well_known_paths() {
        let tree = ConfigTree::parse(SAMPLE).unwrap();
        assert_eq!(tree.endpoint(), Some("inproc://zm-device-test"));
        assert_eq!(tree.address(), Some("it.zmon.device"));
        assert_eq!(tree.producer(), Some("_DEVICES"));
        assert_eq!(tree.file(), Some(Path::new("/var/lib/zmon/devices.json")));
    }

    #[test]
    fn enumerates_consumers_in_order() {
        let tree = ConfigTree::parse(SAMPLE).unwrap();
        assert_eq!(
            tree.consumers(),
            vec![
                Consumer {
                    stream: "_DEVICES".into(),
                    pattern: ".*".into(),
                },
                Consumer {
                    stream: "_METRICS".into(),
                    pattern: "^cpu#load".into(),
                },
            ]
        );
    }

    #[test]
    fn consumers_are_rebuilt_per_call() {
        let tree = ConfigTree::parse(SAMPLE).unwrap();
        assert_eq!(tree.consumers(), tree.consumers());
    }

    #[test]
    fn duplicate_consumer_stream_keeps_first() {
        let tree = ConfigTree::parse(
            "malamute\n    consumer\n        s = a\n        s = b\n        t\n",
        )
        .unwrap();
        let consumers = tree.consumers();
        assert_eq!(consumers.len(), 2);
        assert_eq!(consumers[0].pattern, "a");
        assert_eq!(consumers[1].pattern, "");
    }

    #[test]
    fn missing_paths_resolve_to_none() {
        let tree = ConfigTree::parse("malamute\n    endpoint = inproc://x\n").unwrap();
        assert_eq!(tree.address(), None);
        assert_eq!(tree.producer(), None);
        assert_eq!(tree.file(), None);
        assert!(tree.consumers().is_empty());
        // A section without a value resolves to nothing either.
        assert_eq!(tree.resolve("malamute"), None);
    }

    #[test]
    fn empty_text_is_an_empty_tree() {
        let tree = ConfigTree::parse("").unwrap();
        assert!(tree.root().children().is_empty());
    }

    #[test]
    fn single_quoted_values_and_crlf() {
        let tree = ConfigTree::parse("a\r\n    b = 'x y'\r\n").unwrap();
        assert_eq!(tree.resolve("a/b"), Some("x y"));
    }

    #[test]
    fn dedent_returns_to_parent_level() {
        let tree = ConfigTree::parse("a\n    b\n        c = 1\n    d = 2\ne = 3\n").unwrap();
        assert_eq!(tree.resolve("a/b/c"), Some("1"));
        assert_eq!(tree.resolve("a/d"), Some("2"));
        assert_eq!(tree.resolve("e"), Some("3"));
    }

    #[test]
    fn put_overrides_and_creates_entries() {
        let mut tree = ConfigTree::parse(SAMPLE).unwrap();
        tree.put(ENDPOINT_PATH, "inproc://elsewhere");
        tree.put("server/timeout", "30");

        assert_eq!(tree.endpoint(), Some("inproc://elsewhere"));
        assert_eq!(tree.resolve("server/timeout"), Some("30"));
        assert_eq!(tree.locate("malamute").unwrap().children().len(), 4);
    }

    #[test]
    fn rendered_text_parses_back() {
        let mut tree = ConfigTree::parse(SAMPLE).unwrap();
        tree.put("quirks/quoted", "say \"hi\"");
        let text = tree.to_string();

        assert!(text.starts_with("server\n    file = \"/var/lib/zmon/devices.json\"\n"));
        assert_eq!(ConfigTree::parse(&text).unwrap(), tree);
    }

    #[test]
    fn rejects_malformed_text() {
        let cases = [
            ("a\n  b = 1\n", 2),
            ("a\n        b = 1\n", 2),
            ("a\n\tb = 1\n", 2),
            ("a = \"open\n", 1),
            ("a =\n", 1),
            ("a b\n", 1),
            ("= 1\n", 1),
            ("a = \"x\" y\n", 1),
        ];
        for (text, expected_line) in cases {
            match ConfigTree::parse(text) {
                Err(CoreError::ConfigParse { line, .. }) => {
                    assert_eq!(line, expected_line, "wrong line for {text:?}");
                }
                other => panic!("expected parse error for {text:?}, got {other:?}"),
            }
        }
    }
}
