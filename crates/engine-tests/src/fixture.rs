//! In-memory stand-in for a third-party directory plugin's tables.

#[derive(Debug, Clone, PartialEq)]
pub struct SourceTerm {
    pub id: u64,
    pub name: String,
    pub parent: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceField {
    pub id: u64,
    pub label: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourcePackage {
    pub id: u64,
    pub name: String,
    pub price_cents: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReview {
    pub author: String,
    pub rating: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceListing {
    pub id: u64,
    pub title: String,
    pub categories: Vec<u64>,
    pub tags: Vec<u64>,
    pub fields: Vec<(u64, String)>,
    pub reviews: Vec<SourceReview>,
}

/// Source tables in source order. A `None` table does not exist.
#[derive(Debug, Clone, Default)]
pub struct DirectorySource {
    pub categories: Vec<SourceTerm>,
    pub tags: Vec<SourceTerm>,
    pub fields: Vec<SourceField>,
    pub packages: Option<Vec<SourcePackage>>,
    pub listings: Vec<SourceListing>,
}

impl DirectorySource {
    /// 3 categories (one nested), 1 custom field, no tags or packages and
    /// `listings` listings: 3 + 1 + listings items in total.
    pub fn sample(listings: u64) -> Self {
        let categories = vec![
            SourceTerm {
                id: 1,
                name: "Restaurants".to_string(),
                parent: None,
            },
            SourceTerm {
                id: 2,
                name: "Pizza".to_string(),
                parent: Some(1),
            },
            SourceTerm {
                id: 3,
                name: "Hotels".to_string(),
                parent: None,
            },
        ];

        let fields = vec![SourceField {
            id: 1,
            label: "Phone".to_string(),
            kind: "text".to_string(),
        }];

        Self {
            categories,
            tags: Vec::new(),
            fields,
            packages: Some(Vec::new()),
            listings: (1..=listings).map(listing).collect(),
        }
    }

    pub fn with_tags(mut self, n: u64) -> Self {
        self.tags = (1..=n)
            .map(|id| SourceTerm {
                id,
                name: format!("tag-{id}"),
                parent: None,
            })
            .collect();
        self
    }

    pub fn with_packages(mut self, n: u64) -> Self {
        self.packages = Some(
            (1..=n)
                .map(|id| SourcePackage {
                    id,
                    name: format!("Plan {id}"),
                    price_cents: id * 1_000,
                })
                .collect(),
        );
        self
    }

    pub fn without_packages_table(mut self) -> Self {
        self.packages = None;
        self
    }

    /// Blanks the title of listing `id`; the destination refuses it.
    pub fn with_broken_listing(mut self, id: u64) -> Self {
        if let Some(listing) = self.listings.iter_mut().find(|l| l.id == id) {
            listing.title.clear();
        }
        self
    }

    pub fn listing(&self, id: u64) -> Option<&SourceListing> {
        self.listings.iter().find(|l| l.id == id)
    }

    pub fn total_items(&self) -> u64 {
        let packages = self.packages.as_ref().map_or(0, Vec::len);
        let rows = self.categories.len()
            + self.tags.len()
            + self.fields.len()
            + packages
            + self.listings.len();
        rows as u64
    }
}

fn listing(id: u64) -> SourceListing {
    let reviews = (0..id % 3)
        .map(|n| SourceReview {
            author: format!("reviewer-{n}"),
            rating: (n % 5 + 1) as u8,
        })
        .collect();

    SourceListing {
        id,
        title: format!("Listing {id}"),
        categories: vec![1 + id % 3],
        tags: Vec::new(),
        fields: vec![(1, format!("555-{id:04}"))],
        reviews,
    }
}

/// Paging helper shared by the stage handlers.
pub fn page<T>(rows: &[T], offset: u64, limit: usize) -> &[T] {
    let start = (offset as usize).min(rows.len());
    let end = start.saturating_add(limit).min(rows.len());
    &rows[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_counts_every_table() {
        let source = DirectorySource::sample(120);
        assert_eq!(source.total_items(), 124);
        assert_eq!(source.clone().with_tags(2).with_packages(3).total_items(), 129);
        assert_eq!(source.without_packages_table().total_items(), 124);
    }

    #[test]
    fn page_clamps_to_table_end() {
        let rows = [1, 2, 3, 4, 5];
        assert_eq!(page(&rows, 0, 2), &[1, 2]);
        assert_eq!(page(&rows, 4, 2), &[5]);
        assert!(page(&rows, 9, 2).is_empty());
    }
}
