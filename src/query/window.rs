//! Proximity matching over the extents of aligned children

use crate::segment::Extent;

/// Spans where every term occurs in order.
///
/// Each term must begin no more than `width - 1` positions after the previous
/// one ends, so `width == 1` matches exact phrases. Candidates start at every
/// occurrence of the first term; for each later term the first occurrence
/// after the previous one is used.
pub fn ordered_window(children: &[&[Extent]], width: u32) -> Vec<Extent> {
    let Some((first, rest)) = children.split_first() else {
        return Vec::new();
    };
    let mut cursors = vec![0usize; rest.len()];
    let mut out = Vec::new();

    'candidates: for start in first.iter() {
        let mut end = start.end;
        for (child, cursor) in rest.iter().zip(cursors.iter_mut()) {
            while *cursor < child.len() && child[*cursor].begin < end {
                *cursor += 1;
            }
            let Some(next) = child.get(*cursor) else {
                // later candidates start even further right
                break 'candidates;
            };
            if next.begin - end >= width {
                continue 'candidates;
            }
            end = next.end;
        }
        out.push(Extent::new(start.begin, end));
    }
    out
}

/// Spans of at most `width` positions containing every term in any order
pub fn unordered_window(children: &[&[Extent]], width: u32) -> Vec<Extent> {
    if children.is_empty() || children.iter().any(|c| c.is_empty()) {
        return Vec::new();
    }
    let mut cursors = vec![0usize; children.len()];
    let mut out = Vec::new();

    loop {
        let mut begin = u32::MAX;
        let mut end = 0u32;
        let mut earliest = 0;
        for (i, (child, &cursor)) in children.iter().zip(&cursors).enumerate() {
            let extent = child[cursor];
            if extent.begin < begin {
                begin = extent.begin;
                earliest = i;
            }
            end = end.max(extent.end);
        }
        if end - begin <= width {
            out.push(Extent::new(begin, end));
        }

        cursors[earliest] += 1;
        if cursors[earliest] >= children[earliest].len() {
            return out;
        }
    }
}

/// Sorted union of the children's extents, duplicates removed
pub fn union_extents(children: &[&[Extent]], out: &mut Vec<Extent>) {
    out.clear();
    for child in children {
        out.extend_from_slice(child);
    }
    out.sort_unstable();
    out.dedup();
}
