pub mod ast;
pub mod parser;
pub mod resolver;
pub mod tokenizer;
pub mod tree_walk_interpreter;
