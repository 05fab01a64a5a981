use crate::util::constants::TABLE_SIZE_AGES;

/// Census of surviving words by object age, taken during young collections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgeTable {
    sizes: [usize; TABLE_SIZE_AGES],
}

impl AgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `words` words of surviving objects of `age`.
    pub fn add(&mut self, age: usize, words: usize) {
        debug_assert!(age < TABLE_SIZE_AGES, "age {} out of range", age);
        self.sizes[age] += words;
    }

    pub fn get(&self, age: usize) -> usize {
        self.sizes[age]
    }

    pub fn merge(&mut self, other: &AgeTable) {
        for (mine, theirs) in self.sizes.iter_mut().zip(other.sizes.iter()) {
            *mine += *theirs;
        }
    }

    pub fn clear(&mut self) {
        self.sizes = [0; TABLE_SIZE_AGES];
    }

    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// The age at which objects should be promoted so that survivors fill about
    /// `target_survivor_ratio` percent of the survivor capacity.
    pub fn compute_tenuring_threshold(
        &self,
        survivor_capacity_words: usize,
        target_survivor_ratio: usize,
        max_tenuring_threshold: usize,
    ) -> usize {
        let desired_survivor_size = survivor_capacity_words * target_survivor_ratio / 100;
        let mut total = 0;
        let mut age = 1;
        while age < TABLE_SIZE_AGES {
            total += self.sizes[age];
            if total > desired_survivor_size {
                break;
            }
            age += 1;
        }
        let result = age.min(max_tenuring_threshold);
        debug!(
            "Desired survivor size {} words, new threshold {} (max threshold {})",
            desired_survivor_size, result, max_tenuring_threshold
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_from_census() {
        let mut t = AgeTable::new();
        t.add(1, 100);
        t.add(2, 100);
        t.add(3, 100);
        // Survivor capacity 400 at 50% is 200 words. Ages 1 and 2 fit exactly; age 3 overflows.
        assert_eq!(t.compute_tenuring_threshold(400, 50, 15), 3);
        assert_eq!(t.compute_tenuring_threshold(400, 100, 15), 15);
        assert_eq!(t.compute_tenuring_threshold(400, 100, 6), 6);
        assert_eq!(t.compute_tenuring_threshold(100, 50, 15), 1);
    }

    #[test]
    fn merge_and_clear() {
        let mut a = AgeTable::new();
        let mut b = AgeTable::new();
        a.add(1, 10);
        b.add(1, 5);
        b.add(4, 7);
        a.merge(&b);
        assert_eq!(a.get(1), 15);
        assert_eq!(a.get(4), 7);
        assert_eq!(a.total(), 22);
        a.clear();
        assert!(a.is_empty());
    }
}
