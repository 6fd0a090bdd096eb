use crate::{Comment, Error};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Username,
    Email,
    CreatedAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Username => "username",
            SortField::Email => "email",
            SortField::CreatedAt => "created_at",
        }
    }

    pub fn parse(s: &str) -> Option<SortField> {
        match s {
            "username" => Some(SortField::Username),
            "email" => Some(SortField::Email),
            "created_at" => Some(SortField::CreatedAt),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> SortOrder {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct SortKey {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for SortKey {
    fn default() -> SortKey {
        SortKey {
            field: SortField::CreatedAt,
            order: SortOrder::Desc,
        }
    }
}

impl SortKey {
    /// Value of the `ordering` query parameter, eg. `-created_at`
    pub fn ordering(&self) -> String {
        match self.order {
            SortOrder::Asc => String::from(self.field.as_str()),
            SortOrder::Desc => format!("-{}", self.field.as_str()),
        }
    }

    pub fn parse_ordering(ordering: &str) -> Option<SortKey> {
        let (order, field) = match ordering.strip_prefix('-') {
            Some(field) => (SortOrder::Desc, field),
            None => (SortOrder::Asc, ordering),
        };
        Some(SortKey {
            field: SortField::parse(field)?,
            order,
        })
    }
}

/// Which page of top-level comments is requested, and how it is sorted
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PageWindow {
    // 1-based, never 0
    page: u32,
    pub sort: SortKey,
}

impl Default for PageWindow {
    fn default() -> PageWindow {
        PageWindow::first(SortKey::default())
    }
}

impl PageWindow {
    /// Page numbers below 1 are clamped to 1
    pub fn new(page: u32, sort: SortKey) -> PageWindow {
        PageWindow {
            page: page.max(1),
            sort,
        }
    }

    pub fn first(sort: SortKey) -> PageWindow {
        PageWindow::new(1, sort)
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn with_page(&self, page: u32) -> PageWindow {
        PageWindow::new(page, self.sort)
    }

    pub fn next(&self) -> PageWindow {
        self.with_page(self.page.saturating_add(1))
    }

    pub fn previous(&self) -> Option<PageWindow> {
        (self.page > 1).then(|| self.with_page(self.page - 1))
    }

    pub fn query(&self) -> [(&'static str, String); 2] {
        [
            ("page", self.page.to_string()),
            ("ordering", self.sort.ordering()),
        ]
    }
}

/// One page of top-level comments, as returned by the backend
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Page {
    #[serde(default)]
    pub count: Option<u64>,
    pub results: Vec<Comment>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawPage {
    #[serde(default)]
    count: Option<u64>,
    results: Vec<serde_json::Value>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    previous: Option<String>,
}

impl Page {
    pub fn empty() -> Page {
        Page::default()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Parses a page body
    ///
    /// A body that is not a page at all is a protocol error. Individual entries that do
    /// not parse as comments are dropped with a warning, so that one bad row does not
    /// hide the rest of the page.
    pub fn decode(body: &[u8]) -> Result<Page, Error> {
        let raw: RawPage = serde_json::from_slice(body)
            .map_err(|err| Error::Protocol(format!("failed parsing comment page: {err}")))?;
        let mut results = Vec::with_capacity(raw.results.len());
        for entry in raw.results {
            match serde_json::from_value::<Comment>(entry) {
                Ok(c) => results.push(c),
                Err(err) => tracing::warn!(?err, "dropping malformed entry from comment page"),
            }
        }
        Ok(Page {
            count: raw.count,
            results,
            next: raw.next,
            previous: raw.previous,
        })
    }
}
