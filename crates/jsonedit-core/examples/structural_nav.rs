//! Open a JSON file and walk its structure from the command line.
//!
//! ```bash
//! cargo run --example structural_nav -- data.json 120
//! ```
//!
//! Prints the node at the given byte offset, its parent chain, and its
//! siblings.

use std::time::Duration;

use jsonedit_core::Document;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "data.json".to_string());
    let offset: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);

    let doc = Document::open(&path)?;
    println!(
        "opened {path}: {} lines, {} bytes, lazy={}",
        doc.line_count(),
        doc.len_bytes(),
        doc.is_lazy()
    );

    doc.wait_for_indexing(Duration::from_secs(60));

    let Some(mut id) = doc.node_at_offset(offset) else {
        println!("no structure at offset {offset}");
        return Ok(());
    };

    let node = doc.node(id).expect("node disappeared");
    println!(
        "node at {offset}: {} [{}, {}) lines {}..={}",
        node.kind, node.start, node.end, node.line_start, node.line_end
    );

    if let Some(prev) = doc.prev_sibling(id) {
        let n = doc.node(prev).unwrap();
        println!("  prev sibling: {} at {}", n.kind, n.start);
    }
    if let Some(next) = doc.next_sibling(id) {
        let n = doc.node(next).unwrap();
        println!("  next sibling: {} at {}", n.kind, n.start);
    }

    print!("  ancestors:");
    while let Some(parent) = doc.parent(id) {
        let n = doc.node(parent).unwrap();
        print!(" {}", n.kind);
        id = parent;
    }
    println!();

    Ok(())
}
