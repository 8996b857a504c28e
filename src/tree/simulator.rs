use anyhow::bail;
use log::debug;
use rand::Rng;

use crate::errors::CoalescentError;
use crate::tree::{Node, NodeIdx::Internal as Int, NodeIdx::Leaf, Tree};
use crate::Result;

/// Simulates a genealogy under the Kingman coalescent with a constant
/// effective population size, for leaves sampled at the given heights.
///
/// Leaves are named `t0`, `t1`, ... in the order of `sample_heights`.
///
/// # Example
/// ```
/// use rand::{rngs::StdRng, SeedableRng};
/// use skygrid::tree::{simulate_coalescent_tree, Genealogy};
/// let mut rng = StdRng::seed_from_u64(7);
/// let tree = simulate_coalescent_tree(&[0.0, 0.0, 0.5, 1.0], 2.0, &mut rng).unwrap();
/// assert_eq!(tree.leaf_count(), 4);
/// assert!(tree.root_height() > 1.0);
/// ```
pub fn simulate_coalescent_tree(
    sample_heights: &[f64],
    population_size: f64,
    rng: &mut impl Rng,
) -> Result<Tree> {
    if sample_heights.is_empty() {
        bail!(CoalescentError::Configuration(
            "Cannot simulate a genealogy without samples".to_string()
        ));
    }
    if population_size <= 0.0 || !population_size.is_finite() {
        bail!(CoalescentError::Configuration(format!(
            "Population size must be positive, got {}",
            population_size
        )));
    }
    if sample_heights.iter().any(|h| !h.is_finite() || *h < 0.0) {
        bail!(CoalescentError::Configuration(
            "Sample heights must be finite and non-negative".to_string()
        ));
    }

    let n = sample_heights.len();
    let mut nodes: Vec<Node> = sample_heights
        .iter()
        .enumerate()
        .map(|(i, &h)| {
            let mut leaf = Node::new(Leaf(i), format!("t{}", i));
            leaf.height = h;
            leaf
        })
        .collect();

    let mut pending: Vec<usize> = (0..n).collect();
    pending.sort_by(|&a, &b| sample_heights[b].total_cmp(&sample_heights[a]));
    let mut active: Vec<usize> = Vec::with_capacity(n);
    let mut time = sample_heights[pending[n - 1]];

    while !pending.is_empty() || active.len() > 1 {
        while let Some(&next) = pending.last() {
            if sample_heights[next] <= time {
                active.push(next);
                pending.pop();
            } else {
                break;
            }
        }
        let next_sample = pending
            .last()
            .map(|&i| sample_heights[i])
            .unwrap_or(f64::INFINITY);
        let k = active.len() as f64;
        if active.len() < 2 {
            time = next_sample;
            continue;
        }
        let rate = k * (k - 1.0) / (2.0 * population_size);
        let wait = -(1.0 - rng.gen::<f64>()).ln() / rate;
        if time + wait >= next_sample {
            time = next_sample;
            continue;
        }
        time += wait;
        let first = active.swap_remove(rng.gen_range(0..active.len()));
        let second = active.swap_remove(rng.gen_range(0..active.len()));
        let parent = nodes.len();
        let mut node = Node::new(Int(parent), "");
        node.children = vec![nodes[first].idx, nodes[second].idx];
        node.height = time;
        for child in [first, second] {
            nodes[child].parent = Some(Int(parent));
            nodes[child].blen = time - nodes[child].height;
        }
        nodes.push(node);
        active.push(parent);
    }

    let root = if nodes.len() == 1 {
        Leaf(0)
    } else {
        Int(nodes.len() - 1)
    };
    let tree = Tree::from_nodes(root, nodes);
    debug!(
        "Simulated a genealogy with {} leaves and root height {}",
        n, tree.height
    );
    Ok(tree)
}
