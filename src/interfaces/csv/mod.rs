pub mod document_writer;
pub mod subscription_reader;
