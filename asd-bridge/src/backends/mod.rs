pub mod ipmb;
