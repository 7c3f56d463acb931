//! Grammar registry — versioned, enumerable keyword tables
//!
//! Each schema major version owns a closed list of [`KeywordSpec`]s. Lookup
//! is exact-string only; nothing is dispatched dynamically. A document picks
//! its grammar through the reserved `schemaVersion` keyword, and the oldest
//! known version applies when it is absent.
//!
//! The tables are data, so they can be listed (`explorer grammar`) and
//! tested without running the parser.

use serde::{Deserialize, Serialize};

/// Reserved config keyword carrying the document's schema version
pub const SCHEMA_VERSION_KEYWORD: &str = "schemaVersion";

/// Config keyword listing decision-table headers that are dimensions
pub const DIMENSIONS_KEYWORD: &str = "dimensions";

// ── Keyword model ─────────────────────────────────────────

/// Where a keyword may appear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    /// Top-level `KEY value...` rows
    Config,
    /// `columns` table: one column definition per row
    Columns,
    /// `graphers` table: the decision table
    Graphers,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BlockType::Config => write!(f, "config"),
            BlockType::Columns => write!(f, "columns"),
            BlockType::Graphers => write!(f, "graphers"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    Single,
    Repeated,
}

/// How a keyword's raw cell values become a [`TypedValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Text,
    Boolean,
    Integer,
    Number,
    /// Absolute http(s) URL or site-relative path
    Url,
    Slug,
    Enum(&'static [&'static str]),
    /// Every non-empty value; whitespace separated inside a single table cell
    List,
    /// Opens a table block of the given type
    BlockStart(BlockType),
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValueType::Text => write!(f, "text"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Integer => write!(f, "integer"),
            ValueType::Number => write!(f, "number"),
            ValueType::Url => write!(f, "url"),
            ValueType::Slug => write!(f, "slug"),
            ValueType::Enum(options) => write!(f, "one of {}", options.join("|")),
            ValueType::List => write!(f, "list"),
            ValueType::BlockStart(block) => write!(f, "{} block", block),
        }
    }
}

/// A parsed keyword value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl TypedValue {
    /// Flatten to the string or list form used in resolved configs
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            TypedValue::Boolean(b) => vec![b.to_string()],
            TypedValue::Integer(n) => vec![n.to_string()],
            TypedValue::Number(n) => vec![n.to_string()],
            TypedValue::Text(s) => vec![s.clone()],
            TypedValue::List(items) => items.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TypedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            TypedValue::List(items) => Some(items),
            _ => None,
        }
    }
}

impl ValueType {
    /// Parse the values that follow a keyword on a config row
    pub fn parse(&self, values: &[&str]) -> Result<TypedValue, String> {
        let first = values.first().map(|v| v.trim()).unwrap_or("");
        match self {
            ValueType::Text => Ok(TypedValue::Text(first.to_string())),
            ValueType::Boolean => match first {
                "true" => Ok(TypedValue::Boolean(true)),
                "false" => Ok(TypedValue::Boolean(false)),
                other => Err(format!("expected 'true' or 'false', found '{}'", other)),
            },
            ValueType::Integer => first
                .parse::<i64>()
                .map(TypedValue::Integer)
                .map_err(|_| format!("expected an integer, found '{}'", first)),
            ValueType::Number => match first.parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(TypedValue::Number(n)),
                _ => Err(format!("expected a number, found '{}'", first)),
            },
            ValueType::Url => {
                if first.starts_with("https://")
                    || first.starts_with("http://")
                    || first.starts_with('/')
                {
                    Ok(TypedValue::Text(first.to_string()))
                } else {
                    Err(format!("expected a URL, found '{}'", first))
                }
            }
            ValueType::Slug => {
                let valid = !first.is_empty()
                    && first
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                if valid {
                    Ok(TypedValue::Text(first.to_string()))
                } else {
                    Err(format!("expected a slug ([A-Za-z0-9_-]), found '{}'", first))
                }
            }
            ValueType::Enum(options) => {
                if options.contains(&first) {
                    Ok(TypedValue::Text(first.to_string()))
                } else {
                    Err(format!(
                        "expected one of {}, found '{}'",
                        options.join(", "),
                        first
                    ))
                }
            }
            ValueType::List => Ok(TypedValue::List(
                values
                    .iter()
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            ValueType::BlockStart(_) => Ok(TypedValue::Text(first.to_string())),
        }
    }

    /// Parse a single table cell; lists are whitespace separated
    pub fn parse_cell(&self, raw: &str) -> Result<TypedValue, String> {
        match self {
            ValueType::List => self.parse(&raw.split_whitespace().collect::<Vec<_>>()),
            _ => self.parse(&[raw]),
        }
    }
}

/// One enumerated keyword of a grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordSpec {
    pub keyword: &'static str,
    pub block: BlockType,
    pub cardinality: Cardinality,
    pub required: bool,
    pub value_type: ValueType,
    pub description: &'static str,
}

impl KeywordSpec {
    const fn new(
        keyword: &'static str,
        block: BlockType,
        value_type: ValueType,
        description: &'static str,
    ) -> Self {
        let cardinality = match value_type {
            ValueType::List => Cardinality::Repeated,
            _ => Cardinality::Single,
        };
        KeywordSpec {
            keyword,
            block,
            cardinality,
            required: false,
            value_type,
            description,
        }
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn parse(&self, values: &[&str]) -> Result<TypedValue, String> {
        self.value_type.parse(values)
    }

    pub fn block_start(&self) -> Option<BlockType> {
        match self.value_type {
            ValueType::BlockStart(block) => Some(block),
            _ => None,
        }
    }
}

// ── Dimension controls ────────────────────────────────────

/// Picker presentation for a dimension, taken from its header suffix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    #[default]
    Dropdown,
    Radio,
    Checkbox,
}

impl ControlType {
    pub const ALL: [ControlType; 3] = [ControlType::Dropdown, ControlType::Radio, ControlType::Checkbox];

    pub fn suffix(self) -> &'static str {
        match self {
            ControlType::Dropdown => " Dropdown",
            ControlType::Radio => " Radio",
            ControlType::Checkbox => " Checkbox",
        }
    }

    /// Split `"Metric Dropdown"` into `("Metric", Dropdown)`
    pub fn split_header(header: &str) -> Option<(&str, ControlType)> {
        Self::ALL.iter().find_map(|control| {
            header
                .strip_suffix(control.suffix())
                .filter(|name| !name.trim().is_empty())
                .map(|name| (name.trim(), *control))
        })
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.suffix().trim())
    }
}

// ── Keyword tables ────────────────────────────────────────

const CHART_TYPES: &[&str] = &[
    "LineChart",
    "ScatterPlot",
    "StackedArea",
    "DiscreteBar",
    "StackedDiscreteBar",
    "SlopeChart",
    "StackedBar",
    "Marimekko",
];

const TABS: &[&str] = &["chart", "map", "table"];

const FACET_DOMAINS: &[&str] = &["shared", "independent"];

const COLUMN_TYPES: &[&str] = &[
    "Numeric",
    "String",
    "Integer",
    "Percentage",
    "Currency",
    "Year",
    "Date",
    "Ordinal",
    "Categorical",
];

use BlockType::{Columns, Config, Graphers};

const CONFIG_V1: &[KeywordSpec] = &[
    KeywordSpec::new(SCHEMA_VERSION_KEYWORD, Config, ValueType::Integer, "Grammar version this document is written against"),
    KeywordSpec::new("explorerTitle", Config, ValueType::Text, "Title shown above the explorer").required(),
    KeywordSpec::new("explorerSubtitle", Config, ValueType::Text, "Subtitle shown under the title"),
    KeywordSpec::new("isPublished", Config, ValueType::Boolean, "Whether the explorer is publicly listed"),
    KeywordSpec::new("hideAlertBanner", Config, ValueType::Boolean, "Hide the beta alert banner"),
    KeywordSpec::new("thumbnail", Config, ValueType::Url, "Preview image used when sharing"),
    KeywordSpec::new("wpBlockId", Config, ValueType::Integer, "Id of an article block rendered below the explorer"),
    KeywordSpec::new("entityType", Config, ValueType::Text, "Noun for selectable entities, e.g. country"),
    KeywordSpec::new("selection", Config, ValueType::List, "Entities selected by default"),
    KeywordSpec::new("subNavId", Config, ValueType::Slug, "Sub-navigation menu to show"),
    KeywordSpec::new("subNavCurrentId", Config, ValueType::Slug, "Highlighted entry of the sub-navigation"),
    KeywordSpec::new("downloadDataLink", Config, ValueType::Url, "Link offered for downloading the data"),
    KeywordSpec::new("indexViewsSeparately", Config, ValueType::Boolean, "Index every view as its own search result"),
    KeywordSpec::new("graphers", Config, ValueType::BlockStart(Graphers), "Decision table mapping choices to chart configs").required(),
    KeywordSpec::new("columns", Config, ValueType::BlockStart(Columns), "Column definitions for indicator data"),
];

const CONFIG_V2: &[KeywordSpec] = &[
    KeywordSpec::new(DIMENSIONS_KEYWORD, Config, ValueType::List, "Decision-table headers to treat as dimensions"),
    KeywordSpec::new("pickerColumnSlugs", Config, ValueType::List, "Columns offered in the entity picker"),
    KeywordSpec::new("yScaleToggle", Config, ValueType::Boolean, "Show the linear/log toggle on every view"),
];

const GRAPHERS_V1: &[KeywordSpec] = &[
    KeywordSpec::new("yVariableIds", Graphers, ValueType::List, "Indicator ids plotted on the y axis"),
    KeywordSpec::new("xVariableId", Graphers, ValueType::Integer, "Indicator id plotted on the x axis"),
    KeywordSpec::new("colorVariableId", Graphers, ValueType::Integer, "Indicator id used for colour"),
    KeywordSpec::new("sizeVariableId", Graphers, ValueType::Integer, "Indicator id used for point size"),
    KeywordSpec::new("grapherId", Graphers, ValueType::Integer, "Existing chart to embed instead of a generated one"),
    KeywordSpec::new("type", Graphers, ValueType::Enum(CHART_TYPES), "Chart type"),
    KeywordSpec::new("title", Graphers, ValueType::Text, "Chart title"),
    KeywordSpec::new("subtitle", Graphers, ValueType::Text, "Chart subtitle"),
    KeywordSpec::new("note", Graphers, ValueType::Text, "Footnote under the chart"),
    KeywordSpec::new("hasMapTab", Graphers, ValueType::Boolean, "Offer a map tab"),
    KeywordSpec::new("defaultView", Graphers, ValueType::Boolean, "Marks the view shown when nothing is selected"),
    KeywordSpec::new("tab", Graphers, ValueType::Enum(TABS), "Tab opened first"),
    KeywordSpec::new("ySlugs", Graphers, ValueType::List, "Column slugs plotted on the y axis"),
    KeywordSpec::new("xSlug", Graphers, ValueType::Slug, "Column slug plotted on the x axis"),
    KeywordSpec::new("colorSlug", Graphers, ValueType::Slug, "Column slug used for colour"),
    KeywordSpec::new("sizeSlug", Graphers, ValueType::Slug, "Column slug used for point size"),
    KeywordSpec::new("tableSlug", Graphers, ValueType::Slug, "Table the column slugs refer to"),
    KeywordSpec::new("relatedQuestionUrl", Graphers, ValueType::Url, "Link to a related article"),
];

const GRAPHERS_V2: &[KeywordSpec] = &[
    KeywordSpec::new("yAxisMin", Graphers, ValueType::Number, "Lower bound of the y axis"),
    KeywordSpec::new("facetYDomain", Graphers, ValueType::Enum(FACET_DOMAINS), "Share the y axis across facets"),
    KeywordSpec::new("yScaleToggle", Graphers, ValueType::Boolean, "Show the linear/log toggle"),
];

const COLUMNS_V1: &[KeywordSpec] = &[
    KeywordSpec::new("slug", Columns, ValueType::Slug, "Identifier referenced from the decision table").required(),
    KeywordSpec::new("name", Columns, ValueType::Text, "Display name"),
    KeywordSpec::new("type", Columns, ValueType::Enum(COLUMN_TYPES), "Value type of the column"),
    KeywordSpec::new("unit", Columns, ValueType::Text, "Unit shown in tooltips"),
    KeywordSpec::new("shortUnit", Columns, ValueType::Text, "Unit shown next to values"),
    KeywordSpec::new("description", Columns, ValueType::Text, "Longer description"),
    KeywordSpec::new("sourceName", Columns, ValueType::Text, "Name of the data source"),
    KeywordSpec::new("sourceLink", Columns, ValueType::Url, "Link to the data source"),
    KeywordSpec::new("color", Columns, ValueType::Text, "Series colour"),
    KeywordSpec::new("tolerance", Columns, ValueType::Integer, "Years a value may be carried forward"),
    KeywordSpec::new("transform", Columns, ValueType::Text, "Derived-column expression"),
];

// ── Grammar ───────────────────────────────────────────────

/// The keyword table for one schema major version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grammar {
    version: u32,
    keywords: Vec<KeywordSpec>,
}

impl Grammar {
    pub fn new(version: u32, keywords: Vec<KeywordSpec>) -> Self {
        Grammar { version, keywords }
    }

    pub fn v1() -> Self {
        let keywords = [CONFIG_V1, GRAPHERS_V1, COLUMNS_V1].concat();
        Grammar::new(1, keywords)
    }

    /// v1 plus explicit dimensions, picker columns and axis controls
    pub fn v2() -> Self {
        let keywords = [CONFIG_V1, CONFIG_V2, GRAPHERS_V1, GRAPHERS_V2, COLUMNS_V1].concat();
        Grammar::new(2, keywords)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Exact-match lookup of a keyword within one block type
    pub fn lookup(&self, keyword: &str, block: BlockType) -> Option<&KeywordSpec> {
        self.keywords
            .iter()
            .find(|spec| spec.block == block && spec.keyword == keyword)
    }

    /// Block type opened by `keyword`, if it is a block-start keyword
    pub fn block_start(&self, keyword: &str) -> Option<BlockType> {
        self.lookup(keyword, BlockType::Config)
            .and_then(KeywordSpec::block_start)
    }

    pub fn keywords(&self) -> &[KeywordSpec] {
        &self.keywords
    }

    pub fn keywords_in(&self, block: BlockType) -> impl Iterator<Item = &KeywordSpec> {
        self.keywords.iter().filter(move |spec| spec.block == block)
    }

    /// Required keywords of the top-level config block
    pub fn required(&self) -> impl Iterator<Item = &KeywordSpec> {
        self.keywords_in(BlockType::Config).filter(|spec| spec.required)
    }
}

/// Every known grammar, ordered by version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarSet {
    grammars: Vec<Grammar>,
}

/// Outcome of picking a grammar for a document
#[derive(Debug)]
pub struct GrammarSelection<'a> {
    pub grammar: &'a Grammar,
    /// Set when the declared version was unusable and a fallback was taken
    pub problem: Option<String>,
}

impl GrammarSet {
    /// Build a set; grammars are sorted by version. Returns `None` when empty.
    pub fn new(mut grammars: Vec<Grammar>) -> Option<Self> {
        if grammars.is_empty() {
            return None;
        }
        grammars.sort_by_key(Grammar::version);
        grammars.dedup_by_key(|g| g.version());
        Some(GrammarSet { grammars })
    }

    /// The grammars shipped with this crate (v1, v2)
    pub fn standard() -> Self {
        GrammarSet {
            grammars: vec![Grammar::v1(), Grammar::v2()],
        }
    }

    pub fn get(&self, version: u32) -> Option<&Grammar> {
        self.grammars.iter().find(|g| g.version() == version)
    }

    pub fn oldest(&self) -> &Grammar {
        &self.grammars[0]
    }

    pub fn newest(&self) -> &Grammar {
        &self.grammars[self.grammars.len() - 1]
    }

    pub fn versions(&self) -> Vec<u32> {
        self.grammars.iter().map(Grammar::version).collect()
    }

    /// Pick the grammar for a declared `schemaVersion` value.
    ///
    /// Absent → oldest. Unparseable or unknown → newest, with a problem message.
    pub fn select(&self, declared: Option<&str>) -> GrammarSelection<'_> {
        let Some(raw) = declared.map(str::trim) else {
            return GrammarSelection {
                grammar: self.oldest(),
                problem: None,
            };
        };
        match raw.parse::<u32>().ok().and_then(|v| self.get(v)) {
            Some(grammar) => GrammarSelection {
                grammar,
                problem: None,
            },
            None => GrammarSelection {
                grammar: self.newest(),
                problem: Some(format!(
                    "unknown {} '{}' (known: {}), using {}",
                    SCHEMA_VERSION_KEYWORD,
                    raw,
                    self.versions()
                        .iter()
                        .map(u32::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    self.newest().version()
                )),
            },
        }
    }
}

impl Default for GrammarSet {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_exact() {
        let grammar = Grammar::v1();
        assert!(grammar.lookup("explorerTitle", BlockType::Config).is_some());
        assert!(grammar.lookup("explorertitle", BlockType::Config).is_none());
        assert!(grammar.lookup("explorerTitle ", BlockType::Config).is_none());
    }

    #[test]
    fn test_lookup_respects_block_type() {
        let grammar = Grammar::v1();
        let chart = grammar.lookup("type", BlockType::Graphers).unwrap();
        let column = grammar.lookup("type", BlockType::Columns).unwrap();
        assert_ne!(chart.value_type, column.value_type);
        assert!(grammar.lookup("yVariableIds", BlockType::Config).is_none());
    }

    #[test]
    fn test_required_keywords_v1() {
        let required: Vec<&str> = Grammar::v1().required().map(|s| s.keyword).collect();
        assert_eq!(required, vec!["explorerTitle", "graphers"]);
    }

    #[test]
    fn test_block_starts() {
        let grammar = Grammar::v1();
        assert_eq!(grammar.block_start("graphers"), Some(BlockType::Graphers));
        assert_eq!(grammar.block_start("columns"), Some(BlockType::Columns));
        assert_eq!(grammar.block_start("explorerTitle"), None);
    }

    #[test]
    fn test_v2_extends_v1() {
        let v1 = Grammar::v1();
        let v2 = Grammar::v2();
        for spec in v1.keywords() {
            assert!(
                v2.lookup(spec.keyword, spec.block).is_some(),
                "v2 dropped {}",
                spec.keyword
            );
        }
        assert!(v1.lookup(DIMENSIONS_KEYWORD, BlockType::Config).is_none());
        assert!(v2.lookup(DIMENSIONS_KEYWORD, BlockType::Config).is_some());
    }

    #[test]
    fn test_keywords_unique_per_block() {
        for grammar in [Grammar::v1(), Grammar::v2()] {
            let mut seen = std::collections::BTreeSet::new();
            for spec in grammar.keywords() {
                assert!(
                    seen.insert((spec.block.to_string(), spec.keyword)),
                    "duplicate keyword {} in v{}",
                    spec.keyword,
                    grammar.version()
                );
            }
        }
    }

    #[test]
    fn test_cardinality_follows_value_type() {
        let grammar = Grammar::v2();
        assert_eq!(
            grammar.lookup("selection", BlockType::Config).unwrap().cardinality,
            Cardinality::Repeated
        );
        assert_eq!(
            grammar.lookup("explorerTitle", BlockType::Config).unwrap().cardinality,
            Cardinality::Single
        );
    }

    #[test]
    fn test_value_parsing() {
        assert_eq!(ValueType::Boolean.parse(&["true"]), Ok(TypedValue::Boolean(true)));
        assert!(ValueType::Boolean.parse(&["yes"]).is_err());
        assert_eq!(ValueType::Integer.parse(&[" 42 "]), Ok(TypedValue::Integer(42)));
        assert!(ValueType::Integer.parse(&["4.2"]).is_err());
        assert_eq!(ValueType::Number.parse(&["-0.5"]), Ok(TypedValue::Number(-0.5)));
        assert!(ValueType::Number.parse(&["NaN"]).is_err());
        assert!(ValueType::Url.parse(&["https://example.org/a.png"]).is_ok());
        assert!(ValueType::Url.parse(&["/grapher/co2"]).is_ok());
        assert!(ValueType::Url.parse(&["example.org"]).is_err());
        assert!(ValueType::Slug.parse(&["co2_per-capita"]).is_ok());
        assert!(ValueType::Slug.parse(&["has space"]).is_err());
        assert!(ValueType::Enum(TABS).parse(&["map"]).is_ok());
        assert!(ValueType::Enum(TABS).parse(&["globe"]).is_err());
    }

    #[test]
    fn test_list_parsing() {
        assert_eq!(
            ValueType::List.parse(&["France", "", "Spain"]),
            Ok(TypedValue::List(vec!["France".into(), "Spain".into()]))
        );
        assert_eq!(
            ValueType::List.parse_cell("123  456"),
            Ok(TypedValue::List(vec!["123".into(), "456".into()]))
        );
    }

    #[test]
    fn test_control_type_headers() {
        assert_eq!(
            ControlType::split_header("Metric Dropdown"),
            Some(("Metric", ControlType::Dropdown))
        );
        assert_eq!(
            ControlType::split_header("Per capita Checkbox"),
            Some(("Per capita", ControlType::Checkbox))
        );
        assert_eq!(ControlType::split_header("metric"), None);
        assert_eq!(ControlType::split_header(" Radio"), None);
    }

    #[test]
    fn test_select_grammar() {
        let set = GrammarSet::standard();
        assert_eq!(set.select(None).grammar.version(), 1);
        assert_eq!(set.select(Some("2")).grammar.version(), 2);
        let unknown = set.select(Some("9"));
        assert_eq!(unknown.grammar.version(), 2);
        assert!(unknown.problem.unwrap().contains("unknown schemaVersion '9'"));
    }

    #[test]
    fn test_grammar_set_sorted() {
        let set = GrammarSet::new(vec![Grammar::v2(), Grammar::v1()]).unwrap();
        assert_eq!(set.versions(), vec![1, 2]);
        assert!(GrammarSet::new(Vec::new()).is_none());
    }
}
