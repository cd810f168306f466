//! Event types and columnar event storage.
//!
//! An event is one (coordinates, signal, error) sample in output space,
//! derived from one detector's one bin. Events are write-once: they are
//! copied between buffers but never mutated in place.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single owned event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Position in output space, one value per dimension.
    pub coords: Vec<f64>,
    /// Signal (intensity) carried by the event.
    pub signal: f64,
    /// Squared error of the signal.
    pub error_squared: f64,
    /// Detector the event came from.
    pub detector_id: u32,
    /// Index of the run the event belongs to.
    pub run_index: u16,
}

impl Event {
    /// Creates a new event.
    #[must_use]
    pub fn new(
        coords: Vec<f64>,
        signal: f64,
        error_squared: f64,
        detector_id: u32,
        run_index: u16,
    ) -> Self {
        Self {
            coords,
            signal,
            error_squared,
            detector_id,
            run_index,
        }
    }

    /// Borrows this event as an [`EventRef`].
    #[must_use]
    pub fn as_ref(&self) -> EventRef<'_> {
        EventRef {
            coords: &self.coords,
            signal: self.signal,
            error_squared: self.error_squared,
            detector_id: self.detector_id,
            run_index: self.run_index,
        }
    }
}

/// A borrowed view of one event stored in an [`EventBuffer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRef<'a> {
    pub coords: &'a [f64],
    pub signal: f64,
    pub error_squared: f64,
    pub detector_id: u32,
    pub run_index: u16,
}

impl EventRef<'_> {
    /// Copies the view into an owned [`Event`].
    #[must_use]
    pub fn to_owned(&self) -> Event {
        Event::new(
            self.coords.to_vec(),
            self.signal,
            self.error_squared,
            self.detector_id,
            self.run_index,
        )
    }
}

/// A batch of events stored in Structure of Arrays (`SoA`) layout.
///
/// Coordinates are stored flat with a stride of `n_dims`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventBuffer {
    n_dims: usize,
    /// Flat coordinates, `n_dims` values per event.
    pub coords: Vec<f64>,
    /// Columnar storage for signal.
    pub signal: Vec<f64>,
    /// Columnar storage for squared errors.
    pub error_squared: Vec<f64>,
    /// Columnar storage for detector ids.
    pub detector_id: Vec<u32>,
    /// Columnar storage for run indices.
    pub run_index: Vec<u16>,
}

impl EventBuffer {
    /// Creates an empty buffer for `n_dims`-dimensional events.
    #[must_use]
    pub fn new(n_dims: usize) -> Self {
        Self::with_capacity(n_dims, 0)
    }

    /// Creates an empty buffer with room for `capacity` events.
    #[must_use]
    pub fn with_capacity(n_dims: usize, capacity: usize) -> Self {
        Self {
            n_dims,
            coords: Vec::with_capacity(capacity * n_dims),
            signal: Vec::with_capacity(capacity),
            error_squared: Vec::with_capacity(capacity),
            detector_id: Vec::with_capacity(capacity),
            run_index: Vec::with_capacity(capacity),
        }
    }

    /// Number of dimensions of every event in the buffer.
    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    /// Returns the number of events in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Clears all columns, keeping the allocation.
    pub fn clear(&mut self) {
        self.coords.clear();
        self.signal.clear();
        self.error_squared.clear();
        self.detector_id.clear();
        self.run_index.clear();
    }

    /// Pushes a single event.
    ///
    /// # Panics
    /// Panics in debug builds if `coords.len()` differs from `n_dims`.
    pub fn push(
        &mut self,
        coords: &[f64],
        signal: f64,
        error_squared: f64,
        detector_id: u32,
        run_index: u16,
    ) {
        debug_assert_eq!(coords.len(), self.n_dims);
        self.coords.extend_from_slice(coords);
        self.signal.push(signal);
        self.error_squared.push(error_squared);
        self.detector_id.push(detector_id);
        self.run_index.push(run_index);
    }

    /// Pushes a borrowed event.
    pub fn push_ref(&mut self, event: EventRef<'_>) {
        self.push(
            event.coords,
            event.signal,
            event.error_squared,
            event.detector_id,
            event.run_index,
        );
    }

    /// Appends all events from another buffer.
    pub fn append(&mut self, other: &EventBuffer) {
        debug_assert_eq!(self.n_dims, other.n_dims);
        self.coords.extend_from_slice(&other.coords);
        self.signal.extend_from_slice(&other.signal);
        self.error_squared.extend_from_slice(&other.error_squared);
        self.detector_id.extend_from_slice(&other.detector_id);
        self.run_index.extend_from_slice(&other.run_index);
    }

    /// Coordinates of the event at `index`.
    #[must_use]
    pub fn coords_of(&self, index: usize) -> &[f64] {
        let start = index * self.n_dims;
        &self.coords[start..start + self.n_dims]
    }

    /// Borrowed view of the event at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> EventRef<'_> {
        EventRef {
            coords: self.coords_of(index),
            signal: self.signal[index],
            error_squared: self.error_squared[index],
            detector_id: self.detector_id[index],
            run_index: self.run_index[index],
        }
    }

    /// Iterates over the events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = EventRef<'_>> + '_ {
        (0..self.len()).map(move |i| self.get(i))
    }

    /// Sum of signal over all events.
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.signal.iter().sum()
    }

    /// Sum of squared errors over all events.
    #[must_use]
    pub fn total_error_squared(&self) -> f64 {
        self.error_squared.iter().sum()
    }

    /// Approximate heap footprint of one event with `n_dims` coordinates.
    #[must_use]
    pub fn bytes_per_event(n_dims: usize) -> usize {
        std::mem::size_of::<f64>() * (n_dims + 2)
            + std::mem::size_of::<u32>()
            + std::mem::size_of::<u16>()
    }
}

impl<'a> FromIterator<EventRef<'a>> for EventBuffer {
    fn from_iter<I: IntoIterator<Item = EventRef<'a>>>(iter: I) -> Self {
        let mut iter = iter.into_iter().peekable();
        let n_dims = iter.peek().map_or(0, |e| e.coords.len());
        let mut buffer = EventBuffer::new(n_dims);
        for event in iter {
            buffer.push_ref(event);
        }
        buffer
    }
}
