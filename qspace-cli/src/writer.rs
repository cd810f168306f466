//! CSV dump of a box tree.

use crate::Result;
use qspace_index::{BoxNode, BoxTree};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes one row per box, in depth-first pre-order.
///
/// Columns: `depth,leaf,n_events,signal,error_squared` followed by a
/// `<name> min,<name> max` pair per dimension.
pub struct BoxDumpWriter {
    writer: BufWriter<File>,
}

impl BoxDumpWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes the header and every box of `tree`; returns the number of
    /// box rows.
    pub fn write_tree(&mut self, tree: &BoxTree) -> Result<usize> {
        write!(self.writer, "depth,leaf,n_events,signal,error_squared")?;
        for dim in tree.dimensions() {
            write!(
                self.writer,
                ",{},{}",
                csv_field(&format!("{} min", dim.name)),
                csv_field(&format!("{} max", dim.name))
            )?;
        }
        writeln!(self.writer)?;

        let mut rows = 0;
        let mut status = Ok(());
        tree.for_each_box(|node| {
            if status.is_ok() {
                status = self.write_box(node);
                rows += 1;
            }
        });
        status?;

        self.writer.flush()?;
        Ok(rows)
    }

    fn write_box(&mut self, node: &BoxNode) -> io::Result<()> {
        write!(
            self.writer,
            "{},{},{},{},{}",
            node.depth(),
            u8::from(node.is_leaf()),
            node.n_events(),
            node.signal(),
            node.error_squared()
        )?;
        let extent = node.extent();
        for (min, max) in extent.min().iter().zip(extent.max()) {
            write!(self.writer, ",{min},{max}")?;
        }
        writeln!(self.writer)
    }
}

fn csv_field(text: &str) -> Cow<'_, str> {
    if text.contains([',', '"', '\n']) {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qspace_core::{Dimension, EventBuffer};
    use qspace_index::TreeConfig;
    use tempfile::NamedTempFile;

    fn tree() -> BoxTree {
        let dims = vec![
            Dimension::new("[H,0,0]", "r.l.u.", 0.0, 4.0),
            Dimension::new("DeltaE", "meV", 0.0, 4.0),
        ];
        let config = TreeConfig::new()
            .with_split_into(2)
            .with_split_threshold(2);
        let mut tree = BoxTree::new(dims, config).unwrap();
        let mut events = EventBuffer::new(2);
        events.push(&[0.5, 0.5], 1.0, 1.0, 1, 0);
        events.push(&[0.6, 0.5], 2.0, 2.0, 1, 0);
        events.push(&[3.5, 3.5], 3.0, 3.0, 2, 0);
        tree.insert_buffer(&events);
        tree
    }

    #[test]
    fn test_write_tree_csv() {
        let tree = tree();
        let file = NamedTempFile::new().unwrap();
        let mut writer = BoxDumpWriter::create(file.path()).unwrap();
        let rows = writer.write_tree(&tree).unwrap();
        assert_eq!(rows, tree.stats().n_boxes);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "depth,leaf,n_events,signal,error_squared,\"[H,0,0] min\",\"[H,0,0] max\",DeltaE min,DeltaE max"
        );
        // The root grid comes first and carries the whole tree.
        assert_eq!(lines.next().unwrap(), "0,0,3,6,6,0,4,0,4");
        assert_eq!(lines.count(), rows - 1);
    }

    #[test]
    fn test_single_leaf_tree() {
        let dims = vec![Dimension::new("|Q|", "Å^-1", 0.0, 2.0)];
        let tree = BoxTree::new(dims, TreeConfig::new()).unwrap();
        let file = NamedTempFile::new().unwrap();
        let rows = BoxDumpWriter::create(file.path())
            .unwrap()
            .write_tree(&tree)
            .unwrap();
        assert_eq!(rows, 1);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("0,1,0,0,0,0,2"));
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("DeltaE"), "DeltaE");
        assert_eq!(csv_field("[H,K,0]"), "\"[H,K,0]\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
