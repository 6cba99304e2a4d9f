//! Unordered image pairs in canonical order.
//!
//! Pairwise quantities (`Rijs`, `vijs`) are stored in the order
//! (0,1), (0,2), …, (0,N−1), (1,2), …, (N−2,N−1).

/// Number of unordered pairs among `n` items.
#[inline]
pub fn n_choose_2(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Position of pair `(i, j)`, `i < j < n`, in canonical order.
#[inline]
pub fn pair_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Iterator over `(i, j)` with `i < j < n`, in canonical order.
#[derive(Debug, Clone)]
pub struct ImagePairs {
    n: usize,
    i: usize,
    j: usize,
}

impl ImagePairs {
    pub fn new(n: usize) -> Self {
        Self { n, i: 0, j: 1 }
    }
}

impl Iterator for ImagePairs {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        if self.j >= self.n {
            self.i += 1;
            self.j = self.i + 1;
            if self.j >= self.n {
                return None;
            }
        }
        let out = (self.i, self.j);
        self.j += 1;
        Some(out)
    }
}

/// All canonical pairs collected, for handing to parallel iterators.
pub fn pair_list(n: usize) -> Vec<(usize, usize)> {
    ImagePairs::new(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_order_and_index() {
        let pairs = pair_list(5);
        assert_eq!(pairs.len(), n_choose_2(5));
        assert_eq!(pairs[0], (0, 1));
        assert_eq!(pairs[3], (0, 4));
        assert_eq!(pairs[4], (1, 2));
        assert_eq!(*pairs.last().unwrap(), (3, 4));
        for (c, &(i, j)) in pairs.iter().enumerate() {
            assert_eq!(pair_index(i, j, 5), c);
        }
    }

    #[test]
    fn test_degenerate_sizes() {
        assert_eq!(n_choose_2(0), 0);
        assert_eq!(n_choose_2(1), 0);
        assert!(pair_list(0).is_empty());
        assert!(pair_list(1).is_empty());
        assert_eq!(pair_list(2), vec![(0, 1)]);
    }
}
