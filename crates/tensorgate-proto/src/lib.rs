pub mod tensorgate {
    pub mod v1 {
        tonic::include_proto!("tensorgate.v1");
    }
}

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("tensorgate_descriptor");
