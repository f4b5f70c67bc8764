//! 地址编解码的往返定律与典型场景。

use proptest::prelude::*;
use spark_afaddr::{
    AddressFamily, AddressFamilyRegistry, AddressType, Scope, SocketAddress, TipcSocketAddress,
    UnixSocketAddress, tipc,
};

fn any_scope() -> impl Strategy<Value = Scope> {
    prop_oneof![
        Just(Scope::NotSpecified),
        Just(Scope::Cluster),
        Just(Scope::Node),
        any::<u32>().prop_map(Scope::from_value),
    ]
}

fn any_type() -> impl Strategy<Value = AddressType> {
    prop_oneof![
        Just(AddressType::ServiceRange),
        Just(AddressType::ServiceAddr),
        Just(AddressType::SocketAddr),
        any::<u32>().prop_map(AddressType::from_value),
    ]
}

/// 服务地址在集群作用域下使用最紧凑的 URI 形式，且能被解析回原值。
#[test]
fn compact_service_uri() {
    let bytes = tipc::encode(AddressType::ServiceAddr, Scope::Cluster, 1, 1, 0);
    let address = TipcSocketAddress::from_bytes(bytes.to_vec(), 0).unwrap();
    assert_eq!(address.to_uri("tipc").unwrap(), "tipc://1.1");
    assert_eq!(TipcSocketAddress::parse_uri("tipc://1.1").unwrap(), address);
}

/// 套接字引用的字段以零填充十六进制输出，类型标记不可省略。
#[test]
fn socket_reference_uri() {
    let bytes = tipc::encode(AddressType::SocketAddr, Scope::NotSpecified, 0x10, 0x20, 0);
    let address = TipcSocketAddress::from_bytes(bytes.to_vec(), 0).unwrap();
    let uri = address.to_uri("tipc").unwrap();
    assert_eq!(uri, "tipc://socket.0x00000010.0x00000020");
    assert_eq!(TipcSocketAddress::parse_uri(&uri).unwrap(), address);
}

/// 包装后的主机名只能由同一地址族解包。
#[test]
fn wrapped_addresses_keep_their_family() {
    let registry = AddressFamilyRegistry::standard();
    let unix: SocketAddress = UnixSocketAddress::in_abstract_namespace("mux", 3)
        .unwrap()
        .into();
    let wrapped = unix.wrap();
    assert_eq!(wrapped.unwrap_with(&registry).unwrap(), unix);
    assert!(wrapped.unwrap_as(AddressFamily::Tipc).is_err());
}

proptest! {
    /// `decode(encode(x)) == x`。
    #[test]
    fn descriptor_round_trip(t in any_type(), s in any_scope(), a: u32, b: u32, c: u32) {
        let fields = tipc::decode(&tipc::encode(t, s, a, b, c)).unwrap();
        prop_assert_eq!(fields.address_type, t);
        prop_assert_eq!(fields.scope, s);
        prop_assert_eq!((fields.a, fields.b, fields.c), (a, b, c));
    }

    /// 集群地址的 URI 对所有 scheme 与端口往返。
    #[test]
    fn tipc_uri_round_trip(
        t in any_type(),
        s in any_scope(),
        a: u32,
        b: u32,
        c: u32,
        port in 0..i32::MAX,
        scheme in prop::sample::select(tipc::SCHEMES),
    ) {
        let bytes = tipc::encode(t, s, a, b, c);
        let address = TipcSocketAddress::from_bytes(bytes.to_vec(), port).unwrap();
        let uri = address.to_uri(scheme).unwrap();
        let parsed = TipcSocketAddress::parse_uri(&uri).unwrap();
        prop_assert_eq!(parsed, address, "uri = {}", uri);
    }

    /// 任意非空字节序列都能经 `http+unix` URI 往返。
    #[test]
    fn unix_http_uri_round_trip(bytes in prop::collection::vec(any::<u8>(), 1..64), port in 0..i32::MAX) {
        let address = UnixSocketAddress::of_bytes(bytes, port).unwrap();
        let uri = address.to_uri("http+unix").unwrap();
        prop_assert_eq!(UnixSocketAddress::parse_uri(&uri).unwrap(), address);
    }

    /// 抽象命名空间地址的可读投影以 `@` 开头且只含可打印 ASCII。
    #[test]
    fn abstract_projection_is_printable(name in prop::collection::vec(any::<u8>(), 0..32)) {
        let address = UnixSocketAddress::in_abstract_namespace(&name, 0).unwrap();
        let path = address.path();
        prop_assert!(path.starts_with('@'));
        prop_assert_eq!(path.len(), name.len() + 1);
        prop_assert!(path.bytes().all(|b| (32..127).contains(&b)));
    }

    /// 包装再解包得到原地址。
    #[test]
    fn wrap_round_trip(bytes in prop::collection::vec(any::<u8>(), 1..32), port in -1..i32::MAX) {
        let address: SocketAddress = UnixSocketAddress::of_bytes(bytes, port).unwrap().into();
        prop_assert_eq!(address.wrap().unwrap_as(AddressFamily::Unix).unwrap(), address);
    }
}
