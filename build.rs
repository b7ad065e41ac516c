use tonic_build::manual::{Builder, Method, Service};

fn unary(name: &str, route: &str, input: &str, output: &str) -> Method {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::monitor::wire::{input}"))
        .output_type(format!("crate::monitor::wire::{output}"))
        .codec_path("tonic::codec::ProstCodec")
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let monitor = Service::builder()
        .name("Monitor")
        .package("autokeeper.monitor")
        .method(unary("register_node", "RegisterNode", "RegisterNodeRequest", "AssignedStateReply"))
        .method(unary("node_active", "NodeActive", "NodeActiveRequest", "AssignedStateReply"))
        .method(unary("get_primary", "GetPrimary", "GetPrimaryRequest", "NodeAddressReply"))
        .method(unary("get_other_nodes", "GetOtherNodes", "GetOtherNodesRequest", "NodeListReply"))
        .method(unary("get_coordinator", "GetCoordinator", "GetCoordinatorRequest", "NodeAddressReply"))
        .method(unary("extension_version", "ExtensionVersion", "ExtensionVersionRequest", "ExtensionVersionReply"))
        .method(unary("update_extension", "UpdateExtension", "UpdateExtensionRequest", "ExtensionVersionReply"))
        .build();

    Builder::new()
        .build_server(true)
        .build_client(true)
        .compile(&[monitor]);
}
