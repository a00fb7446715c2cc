// Quick driver: load a transducer and print every analysis for the words
// given on the command line.
//
//   cargo run --example lookup_demo -- morphology.kfst koira kissalle

use kfst::{LookupOptions, Transducer};

fn main() {
    let mut args = std::env::args().skip(1);
    let path = args.next().unwrap_or_else(|| {
        eprintln!("usage: lookup_demo <transducer.att|transducer.kfst> [word...]");
        std::process::exit(2);
    });

    let transducer = if path.ends_with(".att") {
        Transducer::from_att_file(&path)
    } else {
        Transducer::from_kfst_file(&path)
    }
    .expect("failed to load transducer");

    println!("{path}: {transducer:?}");

    for word in args {
        match transducer.lookup(&word, LookupOptions::default()) {
            Ok(results) if results.is_empty() => println!("\n{word:15} → (no analysis)"),
            Ok(results) => {
                println!("\n{word:15} → {} analyses", results.len());
                for (output, weight) in results {
                    println!("  {weight:8.3}  {output}");
                }
            }
            Err(err) => println!("\n{word:15} → error: {err}"),
        }
    }
}
