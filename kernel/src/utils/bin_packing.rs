//! First-fit-decreasing bin packing over weighted items.

/// Packs items into bins whose accumulated weight stays within `target_weight`.
///
/// Items are placed heaviest first into the first bin with room left; an item heavier than the
/// target always opens (and alone occupies) a new bin. The output is stable with respect to the
/// input: members of a bin keep their input order, and bins are ordered by their earliest member.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListPacker {
    target_weight: u64,
}

impl ListPacker {
    pub(crate) fn new(target_weight: u64) -> Self {
        Self { target_weight }
    }

    pub(crate) fn pack<T>(&self, items: Vec<T>, weight: impl Fn(&T) -> u64) -> Vec<Vec<T>> {
        let weights: Vec<u64> = items.iter().map(&weight).collect();

        // stable sort so equal weights keep input order
        let mut by_weight: Vec<usize> = (0..items.len()).collect();
        by_weight.sort_by(|a, b| weights[*b].cmp(&weights[*a]));

        let mut bins: Vec<(u64, Vec<usize>)> = Vec::new();
        for idx in by_weight {
            let w = weights[idx];
            let slot = bins
                .iter_mut()
                .find(|(used, _)| used.saturating_add(w) <= self.target_weight);
            match slot {
                Some((used, members)) => {
                    *used += w;
                    members.push(idx);
                }
                None => bins.push((w, vec![idx])),
            }
        }

        for (_, members) in bins.iter_mut() {
            members.sort_unstable();
        }
        bins.sort_by_key(|(_, members)| members.first().copied());

        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
        bins.into_iter()
            .map(|(_, members)| {
                members
                    .into_iter()
                    .filter_map(|idx| slots[idx].take())
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::all_fit(100, vec![10, 20, 30], vec![vec![10, 20, 30]])]
    #[case::nothing_fits_together(10, vec![8, 7, 9], vec![vec![8], vec![7], vec![9]])]
    #[case::oversized_item_alone(50, vec![10, 80, 20], vec![vec![10, 20], vec![80]])]
    #[case::decreasing_first_fit(100, vec![30, 60, 50, 40], vec![vec![30, 50], vec![60, 40]])]
    #[case::empty(100, vec![], vec![])]
    fn packs_first_fit_decreasing(
        #[case] target: u64,
        #[case] items: Vec<u64>,
        #[case] expected: Vec<Vec<u64>>,
    ) {
        let packer = ListPacker::new(target);
        assert_eq!(packer.pack(items, |w| *w), expected);
    }

    #[test]
    fn bins_respect_target_unless_single_item() {
        let packer = ListPacker::new(64);
        let items: Vec<u64> = vec![5, 63, 12, 40, 70, 1, 33, 20, 9, 64];
        for bin in packer.pack(items, |w| *w) {
            let total: u64 = bin.iter().sum();
            assert!(total <= 64 || bin.len() == 1, "bin {bin:?} exceeds target");
        }
    }
}
