/// Session object running the whole flattening pipeline.
pub mod flattener;
