//! Memory map reconciliation between program sections and captured segments

use crate::image::{LoadSegment, Section};

/// One line of the memory map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRegion {
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub attrs: String,
    /// Whether a captured segment overlapped the section
    pub merged: bool,
}

/// A captured segment that matched no program section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeftoverSegment {
    pub address: u64,
    pub size: u64,
    pub attrs: String,
    pub executable: bool,
}

impl LeftoverSegment {
    /// Executable segments come from ROM, the rest are task TCBs and stacks
    pub fn label(&self) -> &'static str {
        if self.executable {
            "rom.text"
        } else {
            "tasks.data"
        }
    }

    pub fn display_name(&self) -> String {
        format!(".coredump.{}", self.label())
    }
}

impl From<&LoadSegment> for LeftoverSegment {
    fn from(segment: &LoadSegment) -> Self {
        Self {
            address: segment.address,
            size: segment.size(),
            attrs: segment.attr_str(),
            executable: segment.is_executable(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub regions: Vec<MergedRegion>,
    pub leftovers: Vec<LeftoverSegment>,
}

fn overlaps(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
    a_start < b_end && b_start < a_end
}

/// Merge captured segments into the program's section map.
///
/// Each segment merges into the first section it overlaps; the merged region
/// spans both ranges. Ranges that only touch do not overlap.
pub fn reconcile(sections: &[Section], segments: &[LoadSegment]) -> Reconciliation {
    let mut consumed = vec![false; segments.len()];
    let mut regions = Vec::with_capacity(sections.len());

    for section in sections {
        let mut merged = false;
        for (i, segment) in segments.iter().enumerate() {
            if consumed[i] || !overlaps(section.address, section.end(), segment.address, segment.end()) {
                continue;
            }
            let start = section.address.min(segment.address);
            let end = section.end().max(segment.end());
            regions.push(MergedRegion {
                name: section.name.clone(),
                address: start,
                size: end - start,
                attrs: section.attr_str(),
                merged: true,
            });
            consumed[i] = true;
            merged = true;
        }

        if !merged {
            regions.push(MergedRegion {
                name: section.name.clone(),
                address: section.address,
                size: section.size,
                attrs: section.attr_str(),
                merged: false,
            });
        }
    }

    let leftovers = segments
        .iter()
        .zip(&consumed)
        .filter(|(_, &used)| !used)
        .map(|(segment, _)| LeftoverSegment::from(segment))
        .collect();

    Reconciliation { regions, leftovers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::elf::program_header::{PF_R, PF_W, PF_X};
    use goblin::elf::section_header::{SHF_ALLOC, SHF_WRITE};

    fn section(name: &str, address: u64, size: u64) -> Section {
        Section {
            name: name.to_string(),
            address,
            size,
            flags: (SHF_ALLOC | SHF_WRITE) as u64,
            data: Vec::new(),
        }
    }

    fn segment(address: u64, size: usize) -> LoadSegment {
        LoadSegment::new(address, PF_R | PF_W, vec![0; size])
    }

    #[test]
    fn test_overlap_shapes() {
        let sections = [section(".dram0.data", 0x1000, 0x100)];
        let cases = [
            // segment contains section
            (0x0f00, 0x300, 0x0f00, 0x300),
            // section contains segment
            (0x1010, 0x10, 0x1000, 0x100),
            // segment starts before, ends inside
            (0x0f80, 0x100, 0x0f80, 0x180),
            // segment starts inside, ends after
            (0x1080, 0x100, 0x1000, 0x180),
        ];
        for (seg_addr, seg_size, addr, size) in cases {
            let result = reconcile(&sections, &[segment(seg_addr, seg_size)]);
            assert_eq!(result.regions.len(), 1);
            let region = &result.regions[0];
            assert!(region.merged);
            assert_eq!((region.address, region.size), (addr, size));
            assert_eq!(region.attrs, "RW ");
            assert!(result.leftovers.is_empty());
        }
    }

    #[test]
    fn test_disjoint_and_adjacent_ranges_stay_separate() {
        let sections = [section(".dram0.bss", 0x2000, 0x100)];
        let segments = [segment(0x2100, 0x20), segment(0x1000, 0x20)];
        let result = reconcile(&sections, &segments);

        assert_eq!(
            result.regions,
            vec![MergedRegion {
                name: ".dram0.bss".to_string(),
                address: 0x2000,
                size: 0x100,
                attrs: "RW ".to_string(),
                merged: false,
            }]
        );
        assert_eq!(result.leftovers.len(), 2);
        assert_eq!(result.leftovers[0].display_name(), ".coredump.tasks.data");
    }

    #[test]
    fn test_segment_merges_into_first_section_only() {
        let sections = [section(".a", 0x1000, 0x100), section(".b", 0x1100, 0x100)];
        let segments = [segment(0x10f0, 0x20)];
        let result = reconcile(&sections, &segments);

        assert!(result.regions[0].merged);
        assert_eq!(result.regions[0].name, ".a");
        assert!(!result.regions[1].merged);
    }

    #[test]
    fn test_section_merges_several_segments() {
        let sections = [section(".dram0.data", 0x1000, 0x1000)];
        let segments = [segment(0x1100, 0x10), segment(0x1800, 0x10)];
        let result = reconcile(&sections, &segments);
        assert_eq!(result.regions.len(), 2);
        assert!(result.regions.iter().all(|r| r.merged && r.size == 0x1000));
    }

    #[test]
    fn test_executable_leftover_label() {
        let rom = LoadSegment::new(0x4000_0000, PF_R | PF_X, vec![0; 4]);
        let result = reconcile(&[], &[rom]);
        assert_eq!(result.leftovers[0].label(), "rom.text");
        assert_eq!(result.leftovers[0].attrs, "R X");
    }
}
