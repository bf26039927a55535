//! Integration tests for the transport layer
//!
//! These run the framing and both handshakes against in-memory pipes and a
//! loopback listener standing in for the server.

#[cfg(test)]
mod tests {
    use crate::pb;
    use crate::protocol::KrpcError;
    use crate::transport::{RpcConnection, StreamConnection, TcpTransport};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_receive_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let request = pb::Request {
            calls: vec![pb::ProcedureCall {
                service: "KRPC".to_string(),
                procedure: "GetStatus".to_string(),
                ..Default::default()
            }],
        };
        TcpTransport::send_message(&mut client, &request).await.unwrap();

        let received: pb::Request = TcpTransport::receive_message(&mut server).await.unwrap();
        assert_eq!(received, request);
    }

    #[tokio::test]
    async fn test_multiple_frames_are_read_in_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        for id in [1u64, 300, 70000] {
            TcpTransport::send_message(&mut client, &pb::Stream { id }).await.unwrap();
        }

        for id in [1u64, 300, 70000] {
            let stream: pb::Stream = TcpTransport::receive_message(&mut server).await.unwrap();
            assert_eq!(stream.id, id);
        }
    }

    #[tokio::test]
    async fn test_overlong_length_prefix_is_malformed() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0xff; 11]).await.unwrap();

        let result: crate::Result<pb::Response> = TcpTransport::receive_message(&mut server).await;
        assert!(matches!(result, Err(KrpcError::MalformedVarint)));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut prefix = Vec::new();
        crate::wire::encode_varint(200 * 1024 * 1024, &mut prefix);
        client.write_all(&prefix).await.unwrap();

        let result: crate::Result<pb::Response> = TcpTransport::receive_message(&mut server).await;
        assert!(matches!(result, Err(KrpcError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_peer_closing_mid_frame_is_connection_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x05, 0x0a]).await.unwrap();
        drop(client);

        let result: crate::Result<pb::Response> = TcpTransport::receive_message(&mut server).await;
        assert!(matches!(result, Err(KrpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TcpTransport::new();
        let result = transport.connect(&addr.to_string()).await;
        assert!(matches!(result, Err(KrpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_rpc_handshake_returns_client_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request: pb::ConnectionRequest =
                TcpTransport::receive_message(&mut socket).await.unwrap();
            let response = pb::ConnectionResponse {
                status: pb::ConnectionStatus::Ok as i32,
                message: String::new(),
                client_identifier: vec![0x10, 0x20, 0x30],
            };
            TcpTransport::send_message(&mut socket, &response).await.unwrap();
            request
        });

        let transport = TcpTransport::new();
        let connection = RpcConnection::open(&transport, &addr.to_string(), "Jeb").await.unwrap();
        assert_eq!(connection.client_id(), &[0x10, 0x20, 0x30]);

        let request = server.await.unwrap();
        assert_eq!(request.kind, pb::ConnectionType::Rpc as i32);
        assert_eq!(request.client_name, "Jeb");
    }

    #[tokio::test]
    async fn test_rejected_handshake_reports_status_and_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let _: pb::ConnectionRequest = TcpTransport::receive_message(&mut socket).await.unwrap();
            let response = pb::ConnectionResponse {
                status: pb::ConnectionStatus::WrongType as i32,
                message: "expected a stream connection".to_string(),
                client_identifier: Vec::new(),
            };
            TcpTransport::send_message(&mut socket, &response).await.unwrap();
        });

        let transport = TcpTransport::new();
        let err = RpcConnection::open(&transport, &addr.to_string(), "")
            .await
            .unwrap_err();
        match err {
            KrpcError::Connection(message) => {
                assert_eq!(message, "WrongType -- expected a stream connection");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_connection_requires_client_id() {
        let transport = TcpTransport::new();
        let result = StreamConnection::open(&transport, "127.0.0.1:1", &[]).await;
        assert!(matches!(result, Err(KrpcError::Connection(_))));
    }

    #[tokio::test]
    async fn test_stream_connection_reads_updates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request: pb::ConnectionRequest =
                TcpTransport::receive_message(&mut socket).await.unwrap();
            assert_eq!(request.kind, pb::ConnectionType::Stream as i32);
            assert_eq!(request.client_identifier, vec![7, 7]);

            let ok = pb::ConnectionResponse::default();
            TcpTransport::send_message(&mut socket, &ok).await.unwrap();

            let update = pb::StreamUpdate {
                results: vec![pb::StreamResult {
                    id: 3,
                    result: Some(pb::ProcedureResult {
                        error: None,
                        value: vec![0x2a],
                    }),
                }],
            };
            TcpTransport::send_message(&mut socket, &update).await.unwrap();
        });

        let transport = TcpTransport::new();
        let mut connection = StreamConnection::open(&transport, &addr.to_string(), &[7, 7])
            .await
            .unwrap();

        assert!(connection.wait_for_frame().await.unwrap());
        let update = connection.next_update().await.unwrap();
        assert_eq!(update.results.len(), 1);
        assert_eq!(update.results[0].id, 3);

        // Server task has finished and dropped its socket.
        assert!(!connection.wait_for_frame().await.unwrap());
    }
}
