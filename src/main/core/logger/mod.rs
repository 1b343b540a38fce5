pub mod vnet_logger;
