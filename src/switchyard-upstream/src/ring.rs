use switchyard_core::Upstream;

const VNODES_PER_WEIGHT: u32 = 4;
const MAX_VNODES: u32 = 512;

/// Weighted consistent-hash ring over the reachable members of one snapshot.
///
/// Points map to indexes into the member list the ring was built from.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
}

impl HashRing {
    pub fn build<'a>(members: impl IntoIterator<Item = (usize, &'a Upstream)>) -> Self {
        let mut points = Vec::new();
        for (idx, upstream) in members {
            let vnodes = upstream.weight.max(1).saturating_mul(VNODES_PER_WEIGHT).min(MAX_VNODES);
            for vn in 0..vnodes {
                points.push((fxhash::hash64(&format!("{}#{vn}", upstream.url)), idx));
            }
        }
        points.sort_unstable();
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Member index owning `key`: the first point clockwise from its hash.
    pub fn locate(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = fxhash::hash64(key);
        let pos = self.points.partition_point(|(h, _)| *h < hash);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<Upstream> {
        vec![
            Upstream::new("10.0.0.1:80", 50),
            Upstream::new("10.0.0.2:80", 50),
            Upstream::new("10.0.0.3:80", 50),
        ]
    }

    #[test]
    fn test_same_key_same_member() {
        let list = members();
        let ring = HashRing::build(list.iter().enumerate());
        let first = ring.locate("user-42");
        for _ in 0..100 {
            assert_eq!(ring.locate("user-42"), first);
        }
    }

    #[test]
    fn test_vnodes_scale_with_weight_and_cap() {
        let heavy = vec![Upstream::new("a:1", 1000)];
        assert_eq!(HashRing::build(heavy.iter().enumerate()).len(), 512);
        let zero = vec![Upstream::new("b:1", 0)];
        assert_eq!(HashRing::build(zero.iter().enumerate()).len(), 4);
    }

    #[test]
    fn test_removing_a_member_only_moves_its_keys() {
        let list = members();
        let full = HashRing::build(list.iter().enumerate());
        let partial = HashRing::build(list.iter().enumerate().filter(|(i, _)| *i != 2));

        for n in 0..500 {
            let key = format!("k{n}");
            let before = full.locate(&key).unwrap();
            if before != 2 {
                assert_eq!(partial.locate(&key), Some(before));
            }
        }
    }

    #[test]
    fn test_empty_ring() {
        assert_eq!(HashRing::default().locate("x"), None);
    }
}
