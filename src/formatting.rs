//! formatting prints query outputs nicely.

use crate::plan::QueryOutput;

/// Printing out query results.
/// In the future, also csv output, etc.
pub fn print_output(output: &QueryOutput) {
    match output {
        QueryOutput::Single(value) => println!("   {}", value),
        QueryOutput::Rows(values) => {
            for value in values {
                println!("   {}", value);
            }
            println!("   ({} rows)", values.len());
        }
    }
}
