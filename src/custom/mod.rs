//! Plugin entry points compiled into the host. Unit manifests name them in `setup`.

mod checksum;
mod example;
