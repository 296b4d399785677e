//! Walks the full request surface against a locally running broker:
//! create a topic, produce a batch, stream it back, inspect, then tear
//! the topic down.

use appendlog_broker::server::grpc::proto::{
    ConsumeRequest, CreateTopicRequest, DeleteTopicRequest, InspectTopicRequest, ProduceRequest, broker_client::BrokerClient,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = BrokerClient::connect("http://127.0.0.1:4420").await?;

    let topic = "demo.orders".to_string();

    println!("creating topic {topic}");
    let status = client
        .create_topic(CreateTopicRequest { topic: topic.clone() })
        .await?
        .into_inner()
        .status
        .expect("status envelope always present");
    if !status.ok {
        println!("create_topic failed: {} ({})", status.error_message, status.error_kind);
    }

    let records: Vec<&[u8]> = vec![b"hello", b"from", b"the broker"];
    let sizes: Vec<i64> = records.iter().map(|r| r.len() as i64).collect();
    let body: Vec<u8> = records.concat();

    let response = client
        .produce(ProduceRequest {
            topic: topic.clone(),
            sizes,
            body,
        })
        .await?
        .into_inner();
    println!("produced batch starting at offset {}", response.first_offset);

    let mut stream = client
        .consume(ConsumeRequest {
            topic: topic.clone(),
            offset: 0,
            max_batch: -1,
        })
        .await?
        .into_inner();

    let mut sizes = Vec::new();
    let mut payload = Vec::new();
    while let Some(chunk) = stream.message().await? {
        if let Some(status) = &chunk.status {
            if !status.ok {
                println!("consume failed: {} ({})", status.error_message, status.error_kind);
                break;
            }
        }
        if !chunk.sizes.is_empty() {
            sizes = chunk.sizes;
        }
        payload.extend_from_slice(&chunk.chunk);
    }

    let mut cursor = 0usize;
    for size in sizes {
        let size = size as usize;
        let record = String::from_utf8_lossy(&payload[cursor..cursor + size]);
        println!("  record: {record}");
        cursor += size;
    }

    let inspection = client
        .inspect_topic(InspectTopicRequest { topic: topic.clone() })
        .await?
        .into_inner();
    println!(
        "offsets [{}, {}] across {} segment(s)",
        inspection.min_offset, inspection.max_offset, inspection.segment_count
    );

    client.delete_topic(DeleteTopicRequest { topic }).await?;
    println!("topic deleted");

    Ok(())
}
