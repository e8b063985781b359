//! Offset pagination helper
//!
//! Drains a paginated remote listing into a single `Vec`. The total count is
//! never known up front: a page shorter than the requested size ends the
//! stream.

/// One page request: rows `offset..offset + limit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// Inclusive `(from, to)` row range, for range-header style transports
    pub fn range(&self) -> (usize, usize) {
        (self.offset, self.offset + self.limit.saturating_sub(1))
    }
}

/// Offset/limit pager
#[derive(Debug, Clone, Copy)]
pub struct Pager {
    page_size: usize,
}

impl Pager {
    /// Create a pager; a zero page size is bumped to 1
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetch pages until one comes back short
    ///
    /// Results are concatenated in arrival order. The offset advances by the
    /// number of rows actually returned, so no offset is requested twice and
    /// an empty page always terminates.
    pub fn drain<T, E, F>(&self, mut fetch_page: F) -> Result<Vec<T>, E>
    where
        F: FnMut(PageRequest) -> Result<Vec<T>, E>,
    {
        let mut all = Vec::new();
        let mut offset = 0;

        loop {
            let request = PageRequest {
                offset,
                limit: self.page_size,
            };
            let page = fetch_page(request)?;
            let len = page.len();
            all.extend(page);

            if len < self.page_size {
                break;
            }
            offset += len;
        }

        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serve `total` rows from a fake remote, recording every request
    fn drain_fake(total: usize, page_size: usize) -> (Vec<usize>, Vec<PageRequest>) {
        let rows: Vec<usize> = (0..total).collect();
        let mut requests = Vec::new();
        let result: Result<Vec<usize>, ()> = Pager::new(page_size).drain(|req| {
            requests.push(req);
            let end = (req.offset + req.limit).min(rows.len());
            let start = req.offset.min(end);
            Ok(rows[start..end].to_vec())
        });
        (result.unwrap(), requests)
    }

    #[test]
    fn test_returns_every_row_once() {
        for (total, page_size) in [(0, 10), (1, 10), (10, 10), (11, 10), (95, 10), (1000, 1000)] {
            let (rows, requests) = drain_fake(total, page_size);
            assert_eq!(rows, (0..total).collect::<Vec<_>>());

            // ceil(N/P) requests, plus one empty page when N is a multiple of P
            let expected = total / page_size + 1;
            assert_eq!(requests.len(), expected, "total={} page={}", total, page_size);
        }
    }

    #[test]
    fn test_offsets_are_never_repeated() {
        let (_, requests) = drain_fake(35, 10);
        let offsets: Vec<usize> = requests.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_error_stops_draining() {
        let mut calls = 0;
        let result: Result<Vec<u8>, &str> = Pager::new(2).drain(|req| {
            calls += 1;
            if req.offset == 0 {
                Ok(vec![1, 2])
            } else {
                Err("boom")
            }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_page_size() {
        let pager = Pager::new(0);
        assert_eq!(pager.page_size(), 1);
    }

    #[test]
    fn test_range() {
        let req = PageRequest {
            offset: 1000,
            limit: 1000,
        };
        assert_eq!(req.range(), (1000, 1999));
    }
}
