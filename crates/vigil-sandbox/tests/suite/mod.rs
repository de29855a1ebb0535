mod cache;
mod evaluation;
mod safety;
