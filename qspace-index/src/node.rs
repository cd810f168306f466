//! Tree nodes: leaves holding events and grids holding child boxes.

use crate::config::TreeConfig;
use crate::extent::Extent;
use qspace_core::{EventBuffer, EventRef};
use std::ops::{Add, AddAssign};

/// Summed signal, squared error and event count of a region.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aggregate {
    pub signal: f64,
    pub error_squared: f64,
    pub n_events: usize,
}

impl Aggregate {
    /// Contribution of a single event.
    #[must_use]
    pub fn of(event: &EventRef<'_>) -> Self {
        Self {
            signal: event.signal,
            error_squared: event.error_squared,
            n_events: 1,
        }
    }
}

impl Add for Aggregate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            signal: self.signal + rhs.signal,
            error_squared: self.error_squared + rhs.error_squared,
            n_events: self.n_events + rhs.n_events,
        }
    }
}

impl AddAssign for Aggregate {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Contents of a box.
#[derive(Clone, Debug)]
pub enum BoxContent {
    /// Events stored directly.
    Leaf(EventBuffer),
    /// `split_into^D` children tiling the box.
    Grid(Vec<BoxNode>),
}

/// One box of the tree.
///
/// Parents own their children by value; aggregates flow upwards through
/// the return value of [`BoxNode::insert`].
#[derive(Clone, Debug)]
pub struct BoxNode {
    extent: Extent,
    depth: usize,
    aggregate: Aggregate,
    content: BoxContent,
}

impl BoxNode {
    /// Creates an empty box, pre-split down to `config.min_depth`.
    pub(crate) fn new(extent: Extent, depth: usize, config: &TreeConfig) -> Self {
        let mut node = Self {
            content: BoxContent::Leaf(EventBuffer::new(extent.n_dims())),
            extent,
            depth,
            aggregate: Aggregate::default(),
        };
        if depth < config.min_depth {
            node.split(config);
        }
        node
    }

    /// Bounds of this box.
    #[must_use]
    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    /// Depth below the root (root is 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Summed signal, squared error and event count of everything below.
    #[must_use]
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    #[must_use]
    pub fn signal(&self) -> f64 {
        self.aggregate.signal
    }

    #[must_use]
    pub fn error_squared(&self) -> f64 {
        self.aggregate.error_squared
    }

    #[must_use]
    pub fn n_events(&self) -> usize {
        self.aggregate.n_events
    }

    #[must_use]
    pub fn content(&self) -> &BoxContent {
        &self.content
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf(_))
    }

    /// Events of a leaf; `None` for a grid.
    #[must_use]
    pub fn events(&self) -> Option<&EventBuffer> {
        match &self.content {
            BoxContent::Leaf(events) => Some(events),
            BoxContent::Grid(_) => None,
        }
    }

    /// Children of a grid; empty for a leaf.
    #[must_use]
    pub fn children(&self) -> &[BoxNode] {
        match &self.content {
            BoxContent::Leaf(_) => &[],
            BoxContent::Grid(children) => children,
        }
    }

    /// Inserts an event that lies inside this box and returns the delta the
    /// caller must add to its own aggregate.
    pub(crate) fn insert(&mut self, event: EventRef<'_>, config: &TreeConfig) -> Aggregate {
        let delta = self.place(event, config);
        self.split_if_needed(config);
        delta
    }

    /// Splits this leaf if it is over threshold, then re-checks the new
    /// children. Returns true if any split happened.
    pub(crate) fn split_if_needed(&mut self, config: &TreeConfig) -> bool {
        let over_threshold = match &self.content {
            BoxContent::Leaf(events) => events.len() > config.split_threshold,
            BoxContent::Grid(_) => false,
        };
        if over_threshold && self.depth < config.max_depth {
            self.split(config);
            true
        } else {
            false
        }
    }

    /// Walks the whole subtree and splits every leaf that is over threshold.
    pub(crate) fn split_all_if_needed(&mut self, config: &TreeConfig) -> usize {
        if let BoxContent::Grid(children) = &mut self.content {
            return children
                .iter_mut()
                .map(|child| child.split_all_if_needed(config))
                .sum();
        }
        usize::from(self.split_if_needed(config))
    }

    /// Depth-first pre-order walk.
    pub(crate) fn visit<F: FnMut(&BoxNode)>(&self, visitor: &mut F) {
        visitor(self);
        for child in self.children() {
            child.visit(visitor);
        }
    }

    /// Sums everything inside `region`.
    pub(crate) fn integrate(&self, region: &Extent) -> Aggregate {
        if !region.overlaps(&self.extent) {
            return Aggregate::default();
        }
        if region.contains_extent(&self.extent) {
            return self.aggregate;
        }
        match &self.content {
            BoxContent::Grid(children) => children
                .iter()
                .map(|child| child.integrate(region))
                .fold(Aggregate::default(), Add::add),
            BoxContent::Leaf(events) => events
                .iter()
                .filter(|event| region.contains(event.coords))
                .map(|event| Aggregate::of(&event))
                .fold(Aggregate::default(), Add::add),
        }
    }

    /// Adds an event without any split check on the way down.
    fn place(&mut self, event: EventRef<'_>, config: &TreeConfig) -> Aggregate {
        let delta = match &mut self.content {
            BoxContent::Grid(children) => {
                let index = self.extent.child_index(event.coords, config.split_into);
                children[index].insert(event, config)
            }
            BoxContent::Leaf(events) => {
                events.push_ref(event);
                Aggregate::of(&event)
            }
        };
        self.aggregate += delta;
        delta
    }

    /// Turns this leaf into a grid, moving its events into the children,
    /// and splits children that end up over threshold.
    fn split(&mut self, config: &TreeConfig) {
        let events = match &mut self.content {
            BoxContent::Leaf(events) => std::mem::take(events),
            BoxContent::Grid(_) => return,
        };
        let fanout = config.split_into.pow(self.extent_dims());
        let mut children: Vec<BoxNode> = (0..fanout)
            .map(|i| BoxNode::new(self.extent.child(i, config.split_into), self.depth + 1, config))
            .collect();
        for event in events.iter() {
            let index = self.extent.child_index(event.coords, config.split_into);
            children[index].place(event, config);
        }
        for child in &mut children {
            child.split_if_needed(config);
        }
        self.content = BoxContent::Grid(children);
        if !events.is_empty() {
            log::trace!(
                "split box at depth {} holding {} events into {} children",
                self.depth,
                events.len(),
                fanout
            );
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn extent_dims(&self) -> u32 {
        self.extent.n_dims() as u32
    }
}
