// =================================================================
// exchange/websocket.rs - Streaming session shared by venue transports
// =================================================================

use std::sync::Arc;

use exchange_common::data::{OrderBookResponse, Trade};
use exchange_common::ExchangeError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::errors::from_ws;
use super::traits::EventHandler;

/// Venue-specific decoding of inbound text frames
pub trait FrameDecoder: Send + Sync {
    /// Decode one text frame and forward whatever it carries to `events`.
    fn decode(&self, text: &str, events: &dyn EventHandler);
}

/// One decoded inbound event, keyed by a caller market
#[derive(Debug, Clone)]
pub enum StreamEvent {
    OrderBook(OrderBookResponse),
    Trades(String, Vec<Trade>),
}

impl StreamEvent {
    /// This event followed by a copy for every further caller market that
    /// subscribed to the same venue channel. `markets[0]` must be the market
    /// the event was decoded for.
    pub fn fan_out(self, markets: &[String]) -> Vec<StreamEvent> {
        let mut out = Vec::with_capacity(markets.len().max(1));
        for market in markets.iter().skip(1) {
            out.push(self.with_market(market));
        }
        out.insert(0, self);
        out
    }

    fn with_market(&self, market: &str) -> StreamEvent {
        match self {
            StreamEvent::OrderBook(book) => {
                let mut book = book.clone();
                book.market = market.to_string();
                StreamEvent::OrderBook(book)
            }
            StreamEvent::Trades(_, trades) => StreamEvent::Trades(
                market.to_string(),
                trades
                    .iter()
                    .cloned()
                    .map(|mut trade| {
                        trade.market = market.to_string();
                        trade
                    })
                    .collect(),
            ),
        }
    }

    pub fn deliver(self, events: &dyn EventHandler) {
        match self {
            StreamEvent::OrderBook(book) => events.on_orderbook(book),
            StreamEvent::Trades(market, trades) => events.on_trades(&market, trades),
        }
    }
}

/// One live WebSocket connection. Outbound frames go through a channel to
/// the task that owns the socket; inbound frames are decoded on that task.
pub struct StreamSession {
    commands: mpsc::UnboundedSender<String>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    pub async fn connect(
        url: &str,
        decoder: Arc<dyn FrameDecoder>,
        events: Arc<dyn EventHandler>,
    ) -> Result<Self, ExchangeError> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| {
            ExchangeError::Connection(format!("Failed to connect to {}: {}", url, e))
        })?;

        debug!("WebSocket connected to {}", url);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let task = tokio::spawn(run_session(
            ws_stream,
            command_rx,
            shutdown_rx,
            decoder,
            events,
        ));

        Ok(Self {
            commands,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// True while the socket task is still running
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Queue a text frame for the venue
    pub fn send(&self, text: String) -> Result<(), ExchangeError> {
        self.commands
            .send(text)
            .map_err(|_| ExchangeError::Connection("WebSocket session has ended".to_string()))
    }

    /// Close the socket gracefully and wait for the task to finish.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("WebSocket task ended abnormally: {}", e);
            }
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_session(
    ws_stream: WsStream,
    mut commands: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: broadcast::Receiver<()>,
    decoder: Arc<dyn FrameDecoder>,
    events: Arc<dyn EventHandler>,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => decoder.decode(&text, events.as_ref()),
                    Some(Ok(Message::Ping(payload))) => {
                        events.on_ping();
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            events.on_error(from_ws(e));
                            events.on_disconnect();
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by server");
                        events.on_disconnect();
                        break;
                    }
                    Some(Err(e)) => {
                        events.on_error(from_ws(e));
                        events.on_disconnect();
                        break;
                    }
                    None => {
                        info!("WebSocket stream ended");
                        events.on_disconnect();
                        break;
                    }
                    _ => continue,
                }
            }
            command = commands.recv() => {
                match command {
                    Some(text) => {
                        debug!("Sending frame ({} bytes)", text.len());
                        if let Err(e) = write.send(Message::Text(text)).await {
                            events.on_error(from_ws(e));
                            events.on_disconnect();
                            break;
                        }
                    }
                    // session handle dropped without close()
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown requested, closing WebSocket gracefully");
                if let Err(e) = write.send(Message::Close(None)).await {
                    warn!("Failed to send close frame: {}", e);
                }
                break;
            }
        }
    }
}
