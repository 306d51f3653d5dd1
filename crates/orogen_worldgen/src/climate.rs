//! Climate classification: 7-dimensional parameter points, the bulk-loaded
//! nearest-neighbor index over them, and the sampler that turns router
//! outputs into query points.

use std::fmt::Debug;

use bevy_math::IVec3;
use serde::{Deserialize, Serialize};

use crate::router::{BoundRouter, DirectSampler};

/// Index fan-out: buckets recurse until they hold at most this many nodes.
const FAN_OUT: usize = 10;

/// One registered climate dimension: a closed interval in quantized
/// coordinates. A point parameter has `min == max`.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParamRepr")]
#[serde(into = "ParamRepr")]
pub struct Param {
    pub min: i64,
    pub max: i64,
}

/// Serialized form: a bare number or a `[min, max]` pair, in unquantized
/// units.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ParamRepr {
    Point(f64),
    Range([f64; 2]),
}

impl From<ParamRepr> for Param {
    fn from(value: ParamRepr) -> Self {
        match value {
            ParamRepr::Point(point) => Param::point(point),
            ParamRepr::Range([min, max]) => Param::range(min, max),
        }
    }
}

impl From<Param> for ParamRepr {
    fn from(value: Param) -> Self {
        if value.min == value.max {
            ParamRepr::Point(unquantize(value.min))
        } else {
            ParamRepr::Range([unquantize(value.min), unquantize(value.max)])
        }
    }
}

#[inline]
pub fn quantize(coord: f64) -> i64 {
    (coord * 10000.0) as i64
}

#[inline]
pub fn unquantize(coord: i64) -> f64 {
    coord as f64 / 10000.0
}

impl Param {
    pub fn point(value: f64) -> Self {
        let value = quantize(value);
        Param {
            min: value,
            max: value,
        }
    }

    pub fn range(min: f64, max: f64) -> Self {
        Param {
            min: quantize(min),
            max: quantize(max),
        }
    }

    /// Zero inside the interval, the gap to the nearer edge outside it.
    fn distance(&self, value: i64) -> i64 {
        let above = value - self.max;
        if above > 0 {
            above
        } else {
            (self.min - value).max(0)
        }
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::point(value)
    }
}

/// A registered biome entry: one interval per climate dimension plus the
/// fixed offset (always a point, distance-weighted like any dimension).
#[derive(Clone, Debug, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamPoint {
    pub temperature: Param,
    pub humidity: Param,
    pub continentalness: Param,
    pub erosion: Param,
    pub depth: Param,
    pub weirdness: Param,
    pub offset: i64,
}

impl ParamPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new<P>(
        temperature: P,
        humidity: P,
        continentalness: P,
        erosion: P,
        depth: P,
        weirdness: P,
        offset: f64,
    ) -> ParamPoint
    where
        P: Into<Param>,
    {
        ParamPoint {
            temperature: temperature.into(),
            humidity: humidity.into(),
            continentalness: continentalness.into(),
            erosion: erosion.into(),
            depth: depth.into(),
            weirdness: weirdness.into(),
            offset: quantize(offset),
        }
    }
}

impl From<ParamPoint> for [Param; 7] {
    #[inline]
    fn from(value: ParamPoint) -> Self {
        [
            value.temperature,
            value.humidity,
            value.continentalness,
            value.erosion,
            value.depth,
            value.weirdness,
            Param {
                min: value.offset,
                max: value.offset,
            },
        ]
    }
}

/// A sampled climate point to classify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetPoint {
    pub temperature: i64,
    pub humidity: i64,
    pub continentalness: i64,
    pub erosion: i64,
    pub depth: i64,
    pub weirdness: i64,
}

impl TargetPoint {
    pub fn new<Q>(
        temperature: Q,
        humidity: Q,
        continentalness: Q,
        erosion: Q,
        depth: Q,
        weirdness: Q,
    ) -> TargetPoint
    where
        Q: Into<f64>,
    {
        TargetPoint {
            temperature: quantize(temperature.into()),
            humidity: quantize(humidity.into()),
            continentalness: quantize(continentalness.into()),
            erosion: quantize(erosion.into()),
            depth: quantize(depth.into()),
            weirdness: quantize(weirdness.into()),
        }
    }

    fn coordinates(&self) -> [i64; 7] {
        [
            self.temperature,
            self.humidity,
            self.continentalness,
            self.erosion,
            self.depth,
            self.weirdness,
            0,
        ]
    }
}

/// Bulk-loaded nearest-neighbor index over climate entries.
///
/// Construction sorts the leaves along whichever dimension minimizes total
/// bucket extent after equal-sized bucketing and recurses until buckets fit
/// the fan-out; queries walk subtrees in registration order with
/// branch-and-bound pruning, so among equidistant leaves the first
/// registered one wins. That tie order matches the reference generator and
/// must not be altered.
pub struct ClimateIndex<T>
where
    T: Clone + PartialEq,
{
    root: Node<T>,
}

impl<T> ClimateIndex<T>
where
    T: Clone + PartialEq + Debug,
{
    /// Bulk-loads the index.
    ///
    /// # Panics
    ///
    /// Panics on an empty entry list; a biome table with no entries is a
    /// configuration error.
    pub fn new<I: IntoIterator<Item = (ParamPoint, T)>>(points: I) -> ClimateIndex<T> {
        let leaves: Vec<Node<T>> = points
            .into_iter()
            .map(|(point, value)| Node::new_leaf(point, value))
            .collect();
        assert!(!leaves.is_empty(), "climate index needs at least one entry");
        ClimateIndex {
            root: Self::build(leaves),
        }
    }

    pub fn find(&self, target: &TargetPoint) -> Option<&T> {
        self.root
            .search(&target.coordinates(), None)
            .and_then(|node| match node {
                Node::Leaf { value, .. } => Some(value),
                Node::SubTree(_) => None,
            })
    }

    fn build(mut nodes: Vec<Node<T>>) -> Node<T> {
        if nodes.len() == 1 {
            return nodes.into_iter().next().unwrap();
        }
        if nodes.len() <= FAN_OUT {
            nodes.sort_by_key(|node| {
                node.parameters()
                    .iter()
                    .map(|p| ((p.min + p.max) / 2).abs())
                    .sum::<i64>()
            });
            return Node::new_subtree(nodes);
        }

        let mut best_cost = i64::MAX;
        let mut best_dimension = 0;
        let mut best_buckets = Vec::new();
        for dimension in 0..7 {
            nodes.sort_by_key(|node| Self::sort_key(&node.parameters()[dimension], false));
            let buckets = Self::bucketize(&nodes);
            let cost = buckets
                .iter()
                .map(|bucket| {
                    bucket
                        .parameters
                        .iter()
                        .map(|p| (p.max - p.min).abs())
                        .sum::<i64>()
                })
                .sum();
            if cost < best_cost {
                best_cost = cost;
                best_dimension = dimension;
                best_buckets = buckets;
            }
        }

        best_buckets.sort_by_key(|bucket| Self::sort_key(&bucket.parameters[best_dimension], true));
        Node::new_subtree(
            best_buckets
                .into_iter()
                .map(|bucket| Self::build(bucket.children))
                .collect(),
        )
    }

    #[inline]
    fn sort_key(param: &Param, absolute: bool) -> i64 {
        let mid = (param.min + param.max) / 2;
        if absolute { mid.abs() } else { mid }
    }

    fn bucketize(nodes: &[Node<T>]) -> Vec<SubTree<T>> {
        let bucket_size = (FAN_OUT as f64)
            .powf(((nodes.len() as f64) - 0.01).ln().div_euclid((FAN_OUT as f64).ln()))
            as usize;
        let mut buckets = Vec::new();
        let mut current = Vec::new();
        for node in nodes {
            current.push(node.clone());
            if current.len() < bucket_size {
                continue;
            }
            buckets.push(SubTree::new(current));
            current = Vec::new();
        }
        if !current.is_empty() {
            buckets.push(SubTree::new(current));
        }
        buckets
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Node<T>
where
    T: Clone + PartialEq,
{
    Leaf { value: T, parameters: [Param; 7] },
    SubTree(SubTree<T>),
}

#[derive(Clone, Debug, PartialEq)]
struct SubTree<T>
where
    T: Clone + PartialEq,
{
    children: Vec<Node<T>>,
    parameters: [Param; 7],
}

impl<T> SubTree<T>
where
    T: Clone + PartialEq,
{
    fn new(children: Vec<Node<T>>) -> Self {
        let mut parameters = *children[0].parameters();
        for node in &children[1..] {
            for (i, parameter) in node.parameters().iter().enumerate() {
                parameters[i].min = parameters[i].min.min(parameter.min);
                parameters[i].max = parameters[i].max.max(parameter.max);
            }
        }
        SubTree {
            children,
            parameters,
        }
    }
}

impl<T> Node<T>
where
    T: Clone + PartialEq,
{
    fn new_leaf(point: ParamPoint, value: T) -> Self {
        Node::Leaf {
            value,
            parameters: point.into(),
        }
    }

    fn new_subtree(children: Vec<Node<T>>) -> Self {
        Node::SubTree(SubTree::new(children))
    }

    fn parameters(&self) -> &[Param; 7] {
        match self {
            Node::Leaf { parameters, .. } => parameters,
            Node::SubTree(subtree) => &subtree.parameters,
        }
    }

    /// Sum of squared per-dimension interval distances.
    fn distance(&self, values: &[i64; 7]) -> i64 {
        values
            .iter()
            .zip(self.parameters())
            .map(|(v, p)| {
                let gap = p.distance(*v);
                gap * gap
            })
            .sum()
    }

    fn search<'a>(&'a self, values: &[i64; 7], mut best: Option<&'a Node<T>>) -> Option<&'a Node<T>> {
        match self {
            Node::Leaf { .. } => Some(self),
            Node::SubTree(subtree) => {
                let mut best_distance = i64::MAX;
                for node in &subtree.children {
                    let bound_distance = node.distance(values);
                    // Strict comparisons keep the first-found leaf on ties.
                    if best_distance > bound_distance {
                        if let Some(found) = node.search(values, best) {
                            let found_distance = if node == found {
                                bound_distance
                            } else {
                                found.distance(values)
                            };
                            if found_distance == 0 {
                                return Some(found);
                            }
                            if found_distance < best_distance {
                                best_distance = found_distance;
                                best = Some(found);
                            }
                        }
                    }
                }
                best
            }
        }
    }
}

/// Derives climate query points from a bound router's outputs, at quarter
/// resolution.
pub struct ClimateSampler<'a> {
    sampler: DirectSampler<'a>,
}

impl<'a> ClimateSampler<'a> {
    pub fn new(router: &'a BoundRouter) -> Self {
        Self {
            sampler: router.sampler(),
        }
    }

    /// Samples the climate point for a quarter-resolution cell.
    pub fn sample(&mut self, quart_x: i32, quart_y: i32, quart_z: i32) -> TargetPoint {
        let pos = IVec3::new(quart_x << 2, quart_y << 2, quart_z << 2);
        let roots = self.sampler.roots();
        TargetPoint {
            temperature: quantize(self.sampler.sample(roots.temperature, pos)),
            humidity: quantize(self.sampler.sample(roots.vegetation, pos)),
            continentalness: quantize(self.sampler.sample(roots.continents, pos)),
            erosion: quantize(self.sampler.sample(roots.erosion, pos)),
            depth: quantize(self.sampler.sample(roots.depth, pos)),
            weirdness: quantize(self.sampler.sample(roots.ridges, pos)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn search_finds_exact_entries() {
        let index = ClimateIndex::new([
            (
                ParamPoint::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
                "red".to_owned(),
            ),
            (
                ParamPoint::new(1.0, 0.0, 0.0, 0.8, 0.0, 0.0, 0.0),
                "green".to_owned(),
            ),
            (
                ParamPoint::new(1.0, 0.0, 0.6, -0.8, -0.1, 0.0, 0.0),
                "blue".to_owned(),
            ),
        ]);
        assert_eq!(
            index
                .find(&TargetPoint::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0))
                .unwrap(),
            "red"
        );
        assert_eq!(
            index
                .find(&TargetPoint::new(1.0, 0.0, 0.0, 0.8, 0.0, 0.0))
                .unwrap(),
            "green"
        );
        assert_eq!(
            index
                .find(&TargetPoint::new(1.0, 0.0, 0.6, -0.8, -0.1, 0.0))
                .unwrap(),
            "blue"
        );
    }

    #[test]
    fn equidistant_tie_goes_to_first_registered() {
        // The query sits exactly between the first two points in the
        // temperature dimension; first registration order must win.
        let index = ClimateIndex::new([
            (
                ParamPoint::new(-0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
                "first".to_owned(),
            ),
            (
                ParamPoint::new(0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
                "second".to_owned(),
            ),
            (
                ParamPoint::new(0.9, 0.9, 0.9, 0.9, 0.9, 0.9, 0.0),
                "far".to_owned(),
            ),
        ]);
        assert_eq!(
            index
                .find(&TargetPoint::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0))
                .unwrap(),
            "first"
        );
    }

    #[test]
    fn range_dimension_contributes_zero_inside() {
        let index = ClimateIndex::new([
            (
                ParamPoint::new(
                    Param::range(-0.5, 0.5),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    0.0,
                ),
                "ranged".to_owned(),
            ),
            (
                ParamPoint::new(
                    Param::point(0.6),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    Param::point(0.0),
                    0.0,
                ),
                "pointy".to_owned(),
            ),
        ]);
        // Inside the range: distance contribution is exactly zero, so the
        // ranged entry wins even though the point entry is close.
        assert_eq!(
            index
                .find(&TargetPoint::new(0.45, 0.0, 0.0, 0.0, 0.0, 0.0))
                .unwrap(),
            "ranged"
        );
        let leaf_distance = Param::range(-0.5, 0.5).distance(quantize(0.45));
        assert_eq!(leaf_distance, 0);
    }

    #[test]
    fn large_index_agrees_with_linear_scan() {
        let mut entries = Vec::new();
        for i in 0..60 {
            let t = (i % 11) as f64 / 5.0 - 1.0;
            let h = (i % 7) as f64 / 3.0 - 1.0;
            let c = (i % 5) as f64 / 2.0 - 1.0;
            let e = (i % 3) as f64 - 1.0;
            let w = (i % 13) as f64 / 6.0 - 1.0;
            entries.push((ParamPoint::new(t, h, c, e, 0.0, w, 0.0), i));
        }
        let index = ClimateIndex::new(entries.clone());

        let linear_best = |target: &TargetPoint| -> i32 {
            let coords = target.coordinates();
            let mut best = (i64::MAX, 0);
            for (point, id) in &entries {
                let params: [Param; 7] = (*point).into();
                let distance: i64 = coords
                    .iter()
                    .zip(&params)
                    .map(|(v, p)| {
                        let d = p.distance(*v);
                        d * d
                    })
                    .sum();
                if distance < best.0 {
                    best = (distance, *id);
                }
            }
            best.1
        };

        // Off-lattice offsets keep every query at a unique distance, so the
        // linear scan's first-found order cannot disagree with the tree's.
        for i in 0..40 {
            let target = TargetPoint::new(
                (i % 9) as f64 / 4.0 - 1.0137,
                (i % 6) as f64 / 3.0 - 0.8071,
                (i % 4) as f64 / 2.0 - 0.9023,
                (i % 3) as f64 - 0.9119,
                0.0031,
                (i % 12) as f64 / 6.0 - 1.0051,
            );
            let found = *index.find(&target).unwrap();
            let expected = linear_best(&target);
            assert_eq!(found, expected, "target {:?}", target);
        }
    }
}
