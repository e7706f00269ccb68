//! Robots.txt rule engine

mod parser;

pub use parser::{RobotRule, RobotRulesParser, RuleSet};
