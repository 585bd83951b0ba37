pub mod cid;
pub mod crypto;
pub mod datetime;
pub mod did;
pub mod recordkey;
pub mod tid;
