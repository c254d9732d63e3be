use crate::model::*;

// ── Interval algebra ──────────────────────────────────────────────

/// Free windows: `open` minus `occupied`. Both inputs may be unsorted and
/// may overlap; the result is sorted and disjoint.
pub fn free_windows(open: &[Span], occupied: &[Span]) -> Vec<Span> {
    let mut open = open.to_vec();
    open.sort_by_key(|s| s.start);
    let open = merge_overlapping(&open);

    if occupied.is_empty() {
        return open;
    }
    let mut occupied = occupied.to_vec();
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    subtract_intervals(&open, &occupied)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Subtract sorted `to_remove` from sorted, disjoint `base`.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
