use serde::Serialize;
use thiserror::Error;

use crate::template::UrlTemplate;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("last index {last} is smaller than first index {first}")]
    Inverted { first: u64, last: u64 },
}

/// Indices to probe: `[first, last]` inclusive, or `[first, ∞)` until the
/// server reports the end of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SegmentRange {
    Bounded { first: u64, last: u64 },
    Unbounded { first: u64 },
}

impl SegmentRange {
    pub fn bounded(first: u64, last: u64) -> Result<Self, RangeError> {
        if last < first {
            return Err(RangeError::Inverted { first, last });
        }
        Ok(Self::Bounded { first, last })
    }

    pub fn unbounded(first: u64) -> Self {
        Self::Unbounded { first }
    }

    pub fn first(&self) -> u64 {
        match *self {
            Self::Bounded { first, .. } | Self::Unbounded { first } => first,
        }
    }

    pub fn last(&self) -> Option<u64> {
        match *self {
            Self::Bounded { last, .. } => Some(last),
            Self::Unbounded { .. } => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::Bounded { .. })
    }

    /// Number of candidates, `None` when unbounded or not representable.
    pub fn len(&self) -> Option<u64> {
        match *self {
            Self::Bounded { first, last } => (last - first).checked_add(1),
            Self::Unbounded { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentCandidate {
    pub index: u64,
    pub url: String,
}

/// Lazily renders candidate URLs in ascending index order.
#[derive(Debug, Clone)]
pub struct SegmentLocator {
    template: UrlTemplate,
    range: SegmentRange,
    next: Option<u64>,
}

impl SegmentLocator {
    pub fn new(template: UrlTemplate, range: SegmentRange) -> Self {
        Self {
            template,
            range,
            next: Some(range.first()),
        }
    }

    pub fn range(&self) -> SegmentRange {
        self.range
    }

    pub fn template(&self) -> &UrlTemplate {
        &self.template
    }
}

impl Iterator for SegmentLocator {
    type Item = SegmentCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.next?;
        if let Some(last) = self.range.last() {
            if index > last {
                self.next = None;
                return None;
            }
        }
        self.next = index.checked_add(1);
        Some(SegmentCandidate {
            index,
            url: self.template.render(index),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match (self.next, self.range.last()) {
            (Some(next), Some(last)) if next <= last => {
                let remaining = (last - next)
                    .checked_add(1)
                    .and_then(|n| usize::try_from(n).ok());
                (remaining.unwrap_or(usize::MAX), remaining)
            }
            (Some(next), None) => {
                let remaining = usize::try_from(u64::MAX - next).unwrap_or(usize::MAX);
                (remaining.saturating_add(1), None)
            }
            _ => (0, Some(0)),
        }
    }
}
