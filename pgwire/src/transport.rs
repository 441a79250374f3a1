//! TCP transport
use crate::error::{PgWireError, Result};
use log::debug;
use tokio::net::TcpStream;
use wireprobe_core::Deadline;

/// Open a TCP connection to the server with Nagle's algorithm disabled
pub async fn connect(host: &str, port: u16, deadline: Deadline) -> Result<TcpStream> {
    let stream = deadline
        .run(TcpStream::connect((host, port)))
        .await?
        .map_err(|e| PgWireError::Connection(format!("Failed to connect to {}:{}: {}", host, port, e)))?;

    stream.set_nodelay(true)?;
    debug!("Connected to {}:{} from {:?}", host, port, stream.local_addr().ok());
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stream = connect("127.0.0.1", port, Deadline::after_millis(2000))
            .await
            .unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_refused_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = connect("127.0.0.1", port, Deadline::after_millis(2000))
            .await
            .unwrap_err();
        assert!(err.is_connection(), "got {:?}", err);
    }
}
