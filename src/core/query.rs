//! Query parameters and pagination utilities

use crate::config::ApiConfig;
use crate::core::error::{ApiError, ApiResult};

/// Query keys with a fixed meaning; every other key is a filter
pub const RESERVED_KEYS: [&str; 7] = [
    "limit",
    "offset",
    "sort",
    "depth",
    "attributes",
    "expand",
    "search",
];

/// Relationships nested deeper than this render as ids
pub const MAX_NESTING: u32 = 10;

/// One `sort` key: a dotted attribute path and its direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub path: Vec<String>,
    pub descending: bool,
}

/// An attribute name, optionally qualified by the model it applies to
///
/// `name` applies to the requested model, `user.name` to nested `User` records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoped {
    pub model: Option<String>,
    pub name: String,
}

impl Scoped {
    fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((model, name)) => Scoped {
                model: Some(model.to_string()),
                name: name.to_string(),
            },
            None => Scoped {
                model: None,
                name: raw.to_string(),
            },
        }
    }
}

/// `attributes` parameter: `name` includes, `!name` excludes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSelection {
    pub include: Vec<Scoped>,
    pub exclude: Vec<Scoped>,
}

/// Parsed query string of a list or read request
///
/// # Example
/// ```text
/// GET /v1/blog_posts?limit=10&offset=20
/// GET /v1/blog_posts?sort=author.name,created_at.desc&depth=2
/// GET /v1/blog_posts?attributes=title,!body,user.name&expand=tags
/// GET /v1/blog_posts?title=Hello*&author.name!=null&tags=1,2
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// Page size, already clamped to `max_limit`
    pub limit: usize,

    pub offset: usize,

    /// Raw `sort` value, echoed in list envelopes
    pub sort: Option<String>,

    pub sort_keys: Vec<SortKey>,

    /// Requested depth, already clamped to `max_depth`
    pub depth: Option<u32>,

    pub attributes: AttributeSelection,

    pub expand: Vec<Scoped>,

    pub search: Option<String>,

    /// Filter pairs in request order
    pub filters: Vec<(String, String)>,
}

impl QueryParams {
    /// Interpret decoded query pairs
    ///
    /// Reserved keys that appear more than once keep their last value.
    pub fn parse(pairs: &[(String, String)], config: &ApiConfig) -> ApiResult<Self> {
        let last = |key: &str| {
            pairs
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let limit = match last("limit") {
            None => config.default_limit,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(limit) if limit > 0 => limit,
                _ => return Err(ApiError::param_wrong("`limit` must be a number > 0")),
            },
        }
        .min(config.max_limit);

        let offset = match last("offset") {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ApiError::param_wrong("`offset` must be a number >= 0"))?,
        };

        let depth = match last("depth") {
            None => None,
            Some(raw) => Some(
                raw.trim()
                    .parse::<u32>()
                    .map_err(|_| ApiError::param_wrong("`depth` must be a number >= 0"))?
                    .min(config.max_depth),
            ),
        };

        let sort = last("sort").map(str::to_string);
        let sort_keys = sort.as_deref().map(parse_sort).unwrap_or_default();

        let mut attributes = AttributeSelection::default();
        for item in split_list(last("attributes").unwrap_or_default()) {
            match item.strip_prefix('!') {
                Some(excluded) => attributes.exclude.push(Scoped::parse(excluded)),
                None => attributes.include.push(Scoped::parse(item)),
            }
        }

        let expand = split_list(last("expand").unwrap_or_default())
            .map(Scoped::parse)
            .collect();

        let search = last("search")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let filters = pairs
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .cloned()
            .collect();

        Ok(Self {
            limit,
            offset,
            sort,
            sort_keys,
            depth,
            attributes,
            expand,
            search,
            filters,
        })
    }

    /// Depth to render with: requested, else the model default, else the config default
    pub fn effective_depth(&self, model_default: Option<u32>, config: &ApiConfig) -> u32 {
        self.depth
            .or(model_default)
            .unwrap_or(config.default_depth)
            .min(MAX_NESTING)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_sort(raw: &str) -> Vec<SortKey> {
    split_list(raw)
        .map(|key| {
            let (path, descending) = if let Some(path) = key.strip_suffix(".desc") {
                (path, true)
            } else if let Some(path) = key.strip_suffix(".asc") {
                (path, false)
            } else {
                (key, false)
            };
            SortKey {
                path: path.split('.').map(str::to_string).collect(),
                descending,
            }
        })
        .filter(|key| key.path.iter().all(|segment| !segment.is_empty()))
        .collect()
}

/// Previous/next page links of a list response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLinks {
    pub previous: Option<String>,
    pub next: Option<String>,
}

impl PageLinks {
    /// Build links from the raw query string of the current request
    ///
    /// Every parameter is kept verbatim except `offset`, which is appended with
    /// the new value.
    pub fn new(
        resource_url: &str,
        raw_query: Option<&str>,
        offset: usize,
        limit: usize,
        count: usize,
    ) -> Self {
        let params: Vec<&str> = raw_query
            .unwrap_or_default()
            .split('&')
            .filter(|segment| !segment.is_empty())
            .filter(|segment| segment.split('=').next() != Some("offset"))
            .collect();
        let params = params.join("&");

        let link = |offset: usize| {
            if params.is_empty() {
                format!("{}?offset={}", resource_url, offset)
            } else {
                format!("{}?{}&offset={}", resource_url, params, offset)
            }
        };

        let end = offset.saturating_add(limit);
        let next = (count > end).then(|| link(end));
        let previous = (offset > 0).then(|| link(offset.saturating_sub(limit)));

        Self { previous, next }
    }
}
