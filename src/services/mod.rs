pub mod storage_service;
pub mod upload;
