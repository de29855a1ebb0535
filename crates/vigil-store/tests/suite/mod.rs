mod concurrency;
mod persistence;
mod retention;
