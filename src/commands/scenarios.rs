//! Scenarios command

use crate::suite::SCENARIOS;

pub fn run() {
    for name in SCENARIOS {
        println!("{}", name);
    }
}
