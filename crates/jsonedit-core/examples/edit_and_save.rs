//! Edit one line of a JSON file and save it with progress reporting.
//!
//! ```bash
//! cargo run --example edit_and_save -- data.json 3 '  "edited": true,'
//! ```

use std::time::Duration;

use jsonedit_core::Document;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| "data.json".to_string());
    let line: usize = args.next().map(|s| s.parse()).transpose()?.unwrap_or(0);
    let text = args.next().unwrap_or_else(|| "\"edited\": true,".to_string());

    let mut doc = Document::open(&path)?;
    println!("before: {}", doc.read_line(line).trim_end());

    doc.write(line, &format!("{text}\n"));
    println!("after:  {}", doc.read_line(line).trim_end());

    let job = doc.save(None)?;
    while !job.is_finished() {
        println!("saving... {:3.0}%", job.progress() * 100.0);
        std::thread::sleep(Duration::from_millis(50));
    }
    let report = doc.finish_save(job)?;
    println!(
        "saved {} bytes via {:?}",
        report.bytes_written, report.strategy
    );

    Ok(())
}
