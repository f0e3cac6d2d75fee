//! Queue fetch requests and fetch data from the node

use tokio::sync::mpsc::UnboundedReceiver;

use crate::client::{FetchRequest, NodeClient};

/// Receives [`crate::client::FetchRequest`]'s via an [`tokio::sync::mpsc::UnboundedReceiver`] for queueing
/// and fetching from the node.
/// Returns the data specified in the [`crate::client::FetchRequest`] variant via the provided [`tokio::sync::oneshot::Sender`].
///
/// All requests to the node are handled from this single task so that at most one request is
/// outstanding at any time.
pub async fn fetch<N: NodeClient>(
    mut fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    mut node: N,
) {
    let mut fetch_request_queue: Vec<FetchRequest> = Vec::new();

    loop {
        // returns here when all requests have been fetched and every sender has been dropped
        if receive_fetch_requests(&mut fetch_request_receiver, &mut fetch_request_queue).await {
            return;
        }

        if let Some(request) = select_fetch_request(&mut fetch_request_queue) {
            fetch_from_node(&mut node, request).await;
        }
    }
}

// receives fetch requests and populates the fetch request queue
//
// returns `true` if the fetch request channel is closed and all fetch requests have been completed,
// signalling the fetcher is no longer needed.
async fn receive_fetch_requests(
    receiver: &mut UnboundedReceiver<FetchRequest>,
    fetch_request_queue: &mut Vec<FetchRequest>,
) -> bool {
    // if there are no fetch requests to process, sleep until the next fetch request is received
    // or channel is closed
    if fetch_request_queue.is_empty() {
        if let Some(fetch_request) = receiver.recv().await {
            fetch_request_queue.push(fetch_request);
        }
    }
    // receive all remaining fetch requests from channel
    // when channel is empty return `false` to continue fetching data from the node
    // when channel is closed and all fetch requests are processed, return `true`
    loop {
        match receiver.try_recv() {
            Ok(fetch_request) => fetch_request_queue.push(fetch_request),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                if fetch_request_queue.is_empty() {
                    return true;
                } else {
                    break;
                }
            }
        }
    }

    false
}

// requests are served in the order they were received
fn select_fetch_request(fetch_request_queue: &mut Vec<FetchRequest>) -> Option<FetchRequest> {
    if fetch_request_queue.is_empty() {
        None
    } else {
        Some(fetch_request_queue.remove(0))
    }
}

async fn fetch_from_node<N: NodeClient>(node: &mut N, fetch_request: FetchRequest) {
    // a requester may give up waiting, in which case the reply is discarded
    let delivered = match fetch_request {
        FetchRequest::BlockCount(sender) => {
            tracing::debug!("Fetching local node block count.");
            sender.send(node.local_node_block_count().await).is_ok()
        }
        FetchRequest::WalletSyncData(sender, request) => {
            tracing::debug!(
                "Fetching wallet sync data. start height: {}, start timestamp: {}, checkpoints: {}",
                request.start_height,
                request.start_timestamp,
                request.block_hash_checkpoints.len()
            );
            sender.send(node.wallet_sync_data(request).await).is_ok()
        }
        FetchRequest::CancelledTransactions(sender, transaction_hashes) => {
            tracing::debug!(
                "Fetching cancelled transactions. {} hashes",
                transaction_hashes.len()
            );
            sender
                .send(node.cancelled_transactions(transaction_hashes).await)
                .is_ok()
        }
    };

    if !delivered {
        tracing::debug!("Fetch request receiver dropped before reply.");
    }
}
