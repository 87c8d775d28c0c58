use std::{collections::HashMap, ops::Range, sync::Mutex};

use crate::{
    config::ReadAheadConfig,
    types::{PageNo, SpaceID},
    utils::HandyMutex,
};

#[derive(Default)]
struct SpaceAccess {
    last_page: Option<PageNo>,
    seq_count: usize,
    last_area: Option<PageNo>,
    area_count: usize,
}

/// Access pattern tracker deciding which pages to prefetch.
///
/// A sequential run (`page == last + 1`) reaching the threshold
/// prefetches the next `area` pages. Otherwise, enough accesses inside
/// one aligned area prefetch that whole area.
pub struct ReadAhead {
    area: u32,
    threshold: usize,
    spaces: Mutex<HashMap<SpaceID, SpaceAccess>>,
}

impl ReadAhead {
    pub fn new(config: &ReadAheadConfig) -> Self {
        let area = config.area.max(1) as u32;
        let threshold = if config.threshold == 0 {
            (area as usize / 2).max(1)
        } else {
            config.threshold
        };
        Self {
            area,
            threshold,
            spaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn area(&self) -> u32 {
        self.area
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record an access, returns the pages to prefetch if any.
    pub fn on_access(&self, space: SpaceID, page_no: PageNo) -> Option<Range<PageNo>> {
        let mut spaces = self.spaces.ml();
        let s = spaces.entry(space).or_insert_with(SpaceAccess::default);

        if s.last_page.map(|p| p.checked_add(1) == Some(page_no)).unwrap_or(false) {
            s.seq_count += 1;
        } else {
            s.seq_count = 1;
        }
        s.last_page = Some(page_no);

        let area = page_no / self.area;
        if s.last_area == Some(area) {
            s.area_count += 1;
        } else {
            s.area_count = 1;
            s.last_area = Some(area);
        }

        if s.seq_count >= self.threshold {
            s.seq_count = 0;
            s.area_count = 0;
            let start = page_no.saturating_add(1);
            return Some(start..start.saturating_add(self.area));
        }
        if s.area_count >= self.threshold {
            s.area_count = 0;
            let start = area * self.area;
            return Some(start..start.saturating_add(self.area));
        }
        None
    }

    pub fn reset(&self, space: SpaceID) {
        self.spaces.ml().remove(&space);
    }
}
