pub mod artifact;
pub mod dispatch;
pub mod geometry;
pub mod mapper;
pub mod pdf;
pub mod raster;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_fixtures;
