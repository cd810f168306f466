use approx::assert_relative_eq;
use qspace_core::{Dimension, Event, EventBuffer};
use qspace_index::{BoxNode, BoxTree, Extent, TreeConfig};

/// Deterministic pseudo-random sequence in [0, 1).
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }
}

fn square_dims() -> Vec<Dimension> {
    vec![
        Dimension::new("Q_x", "Å^-1", -2.0, 2.0),
        Dimension::new("Q_y", "Å^-1", 0.0, 1.0),
    ]
}

fn random_events(n: usize, seed: u64) -> EventBuffer {
    let mut rng = Lcg(seed);
    let mut buffer = EventBuffer::new(2);
    for i in 0..n {
        let x = -2.0 + 4.0 * rng.next_f64();
        let y = rng.next_f64();
        let signal = 1.0 + rng.next_f64();
        buffer.push(&[x, y], signal, signal * 0.5, i as u32, 0);
    }
    buffer
}

fn assert_tiling(node: &BoxNode) {
    let children = node.children();
    if children.is_empty() {
        return;
    }
    let parent = node.extent();
    let mut volume = 0.0;
    for child in children {
        assert!(parent.contains_extent(child.extent()));
        assert_eq!(child.depth(), node.depth() + 1);
        volume += child.extent().volume();
        assert_tiling(child);
    }
    assert_relative_eq!(volume, parent.volume(), max_relative = 1e-12);
    for (i, a) in children.iter().enumerate() {
        for b in &children[i + 1..] {
            assert!(!a.extent().overlaps(b.extent()), "children overlap");
        }
    }
}

fn assert_aggregates_consistent(node: &BoxNode) {
    match node.events() {
        Some(events) => {
            assert_eq!(events.len(), node.n_events());
            assert_relative_eq!(events.total_signal(), node.signal(), max_relative = 1e-12);
            for event in events.iter() {
                assert!(node.extent().contains(event.coords));
            }
        }
        None => {
            let sum: f64 = node.children().iter().map(BoxNode::signal).sum();
            let count: usize = node.children().iter().map(BoxNode::n_events).sum();
            assert_eq!(count, node.n_events());
            assert_relative_eq!(sum, node.signal(), max_relative = 1e-12);
            node.children().iter().for_each(assert_aggregates_consistent);
        }
    }
}

fn leaf_signals(tree: &BoxTree) -> Vec<(Vec<f64>, Vec<f64>, f64, usize)> {
    let mut leaves = Vec::new();
    tree.for_each_box(|node| {
        if node.is_leaf() {
            leaves.push((
                node.extent().min().to_vec(),
                node.extent().max().to_vec(),
                node.signal(),
                node.n_events(),
            ));
        }
    });
    leaves
}

#[test]
fn test_tiling_invariant() {
    let config = TreeConfig::new()
        .with_split_into(3)
        .with_split_threshold(20)
        .with_max_depth(6);
    let mut tree = BoxTree::new(square_dims(), config).unwrap();
    tree.insert_buffer(&random_events(2_000, 7));
    assert!(tree.stats().deepest >= 2);
    assert_tiling(tree.root());
}

#[test]
fn test_conservation() {
    let events = random_events(5_000, 42);
    let config = TreeConfig::new().with_split_into(2).with_split_threshold(50);
    let mut tree = BoxTree::new(square_dims(), config).unwrap();
    assert_eq!(tree.insert_buffer(&events), events.len());

    assert_eq!(tree.n_events(), events.len());
    assert_relative_eq!(tree.signal(), events.total_signal(), max_relative = 1e-10);
    assert_relative_eq!(
        tree.error_squared(),
        events.total_error_squared(),
        max_relative = 1e-10
    );

    let leaf_events: usize = leaf_signals(&tree).iter().map(|leaf| leaf.3).sum();
    assert_eq!(leaf_events, events.len());
    assert_aggregates_consistent(tree.root());
}

#[test]
fn test_split_scenario_one_dimension() {
    let config = TreeConfig::new()
        .with_split_into(2)
        .with_split_threshold(5)
        .with_max_depth(2);
    let dims = vec![Dimension::new("x", "", 0.0, 1.0)];
    let mut tree = BoxTree::new(dims, config).unwrap();
    for i in 0..11 {
        let x = f64::from(i) / 11.0;
        assert!(tree.insert(Event::new(vec![x], 1.0, 1.0, 0, 0).as_ref()));
    }

    let root = tree.root();
    assert!(!root.is_leaf());
    assert_eq!(root.children().len(), 2);
    assert!(root.children().iter().any(|child| !child.is_leaf()));

    // Leaves at max depth keep growing instead of splitting.
    for _ in 0..50 {
        tree.insert(Event::new(vec![0.01], 1.0, 1.0, 0, 0).as_ref());
    }
    tree.split_all_if_needed();
    let stats = tree.stats();
    assert_eq!(stats.deepest, 2);
    assert_eq!(stats.n_events, 61);
    tree.for_each_box(|node| {
        if node.depth() == 2 {
            assert!(node.is_leaf());
        }
    });
}

#[test]
fn test_split_idempotence() {
    let events = random_events(3_000, 99);
    let config = TreeConfig::new()
        .with_split_into(2)
        .with_split_threshold(40)
        .with_max_depth(8);

    let mut one_by_one = BoxTree::new(square_dims(), config.clone()).unwrap();
    for event in events.iter() {
        one_by_one.insert(event);
    }

    let mut batched = BoxTree::new(square_dims(), config.clone()).unwrap();
    batched.insert_buffer(&events);

    let mut deferred =
        BoxTree::new(square_dims(), config.clone().with_split_threshold(usize::MAX)).unwrap();
    deferred.insert_buffer(&events);
    deferred.set_split_threshold(40).unwrap();
    deferred.split_all_if_needed();

    let reference = leaf_signals(&one_by_one);
    for other in [leaf_signals(&batched), leaf_signals(&deferred)] {
        assert_eq!(other.len(), reference.len());
        for (a, b) in reference.iter().zip(&other) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1, b.1);
            assert_eq!(a.3, b.3);
            assert_relative_eq!(a.2, b.2, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_integrate_matches_brute_force() {
    let events = random_events(4_000, 3);
    let config = TreeConfig::new().with_split_into(4).with_split_threshold(30);
    let mut tree = BoxTree::new(square_dims(), config).unwrap();
    tree.insert_buffer(&events);

    let region = Extent::new(vec![-1.3, 0.2], vec![0.9, 0.75]).unwrap();
    let result = tree.integrate(&region).unwrap();

    let expected: Vec<_> = events
        .iter()
        .filter(|event| region.contains(event.coords))
        .collect();
    assert_eq!(result.n_events, expected.len());
    let expected_signal: f64 = expected.iter().map(|event| event.signal).sum();
    assert_relative_eq!(result.signal, expected_signal, max_relative = 1e-10);

    let everything = tree.integrate(tree.extent()).unwrap();
    assert_eq!(everything.n_events, events.len());
}
