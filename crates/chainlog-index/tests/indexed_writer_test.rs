//! End-to-end tests composing the indexed writer with filtered reads.

use std::collections::HashMap;
use std::sync::Arc;

use chainlog_core::{Block, BlockHash};
use chainlog_index::{
    indexes_from, Error, FilterBuilder, FilterBuilderOptions, FilteredReader, IndexFn, IndexName,
    IndexedValue, IndexedWriter, Indexer, IndexerOptions, Indexes,
};
use chainlog_storage::{BlockIntervalRollPolicy, Dataset, Options, Reader, Writer};
use object_store::memory::InMemory;
use object_store::ObjectStore;

type Payload = Vec<u64>;

fn block(number: u64) -> Block<Payload> {
    Block::new(
        BlockHash::from_bytes(&number.to_be_bytes()),
        BlockHash::from_bytes(&(number - 1).to_be_bytes()),
        number,
        1_000 + number,
        vec![number, number + 1],
    )
}

fn decimal_fn() -> IndexFn<Payload> {
    Arc::new(|block: &Block<Payload>| {
        let mut values: HashMap<IndexedValue, Vec<u16>> = HashMap::new();
        for (position, entry) in block.data.iter().enumerate() {
            values
                .entry(IndexedValue::new(entry.to_string()))
                .or_default()
                .push(position as u16);
        }
        Ok(Some(values))
    })
}

fn test_indexes() -> Indexes<Payload> {
    indexes_from([(IndexName::new("all"), decimal_fn())])
}

fn dataset() -> Dataset {
    Dataset::new("dataset").with_version("v1")
}

fn options(store: &Arc<dyn ObjectStore>) -> Options<Payload> {
    Options::new(dataset())
        .with_store(Arc::clone(store))
        .with_roll_on_close(true)
}

async fn indexer(store: &Arc<dyn ObjectStore>) -> Arc<Indexer<Payload>> {
    Arc::new(
        Indexer::open(IndexerOptions {
            dataset: dataset(),
            store: Some(Arc::clone(store)),
            indexes: test_indexes(),
        })
        .await
        .unwrap(),
    )
}

fn filter_builder(store: &Arc<dyn ObjectStore>) -> FilterBuilder<Payload> {
    FilterBuilder::new(FilterBuilderOptions {
        dataset: dataset(),
        store: Some(Arc::clone(store)),
        indexes: test_indexes(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_write_flush_and_filtered_read() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    {
        let mut writer = IndexedWriter::open(options(&store), indexer(&store).await)
            .await
            .unwrap();
        for n in 1..=30 {
            writer.write(block(n)).await.unwrap();
        }
        writer.close().await.unwrap();
        assert_eq!(writer.block_num().await, 30);
    }

    // value "7" occurs in block 6 (position 1) and block 7 (position 0)
    let builder = filter_builder(&store);
    let reader = Reader::open(options(&store)).await.unwrap();
    let mut filtered = FilteredReader::new(reader, builder.eq("all", "7"));

    let first = filtered.read().await.unwrap().unwrap();
    assert_eq!(first.number, 6);
    assert_eq!(first.data, vec![7]);

    let second = filtered.read().await.unwrap().unwrap();
    assert_eq!(second.number, 7);
    assert_eq!(second.data, vec![7]);

    assert!(filtered.read().await.unwrap().is_none());
    assert_eq!(filtered.block_num(), 7);
}

#[tokio::test]
async fn test_roll_policy_flushes_indexes() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let indexer = indexer(&store).await;

    let opts = options(&store)
        .with_roll_on_close(false)
        .with_roll_policy(Arc::new(BlockIntervalRollPolicy::new(10)));
    let mut writer = IndexedWriter::open(opts, Arc::clone(&indexer)).await.unwrap();

    for n in 1..=15 {
        writer.write(block(n)).await.unwrap();
    }
    // blocks 1..=10 sealed by the interval policy; the wrapped policy must
    // have flushed the indexes for them without an explicit flush call
    let builder = filter_builder(&store);
    let iter = builder.eq("all", "5").eval().await.unwrap();
    assert!(!iter.bitmap().is_empty());

    // blocks 11..=15 are still buffered on both sides
    let iter = builder.eq("all", "14").eval().await.unwrap();
    assert!(iter.bitmap().is_empty());
}

#[tokio::test]
async fn test_replay_converges_after_partial_ingest() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    // indexes get ahead of the writer: index 1..=5, persist, but only
    // write segments for 1..=3
    {
        let idx = indexer(&store).await;
        for n in 1..=5 {
            idx.index(&block(n)).await.unwrap();
        }
        idx.flush().await.unwrap();

        let mut writer = Writer::open(options(&store)).await.unwrap();
        for n in 1..=3 {
            writer.write(block(n)).await.unwrap();
        }
        writer.close().await.unwrap();
    }

    // replaying 1..=5 through the composite converges both sides
    let mut writer = IndexedWriter::open(options(&store), indexer(&store).await)
        .await
        .unwrap();
    for n in 1..=5 {
        writer.write(block(n)).await.unwrap();
    }
    writer.close().await.unwrap();
    assert_eq!(writer.block_num().await, 5);

    let mut reader = Reader::open(options(&store)).await.unwrap();
    let mut numbers = Vec::new();
    while let Some(b) = reader.read().await.unwrap() {
        numbers.push(b.number);
    }
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_open_fails_when_writer_is_ahead() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    {
        let mut writer = Writer::open(options(&store)).await.unwrap();
        for n in 1..=4 {
            writer.write(block(n)).await.unwrap();
        }
        writer.close().await.unwrap();
    }

    let err = IndexedWriter::open(options(&store), indexer(&store).await)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WriterAhead { writer: 4, indexer: 0 }));
}

#[tokio::test]
async fn test_filtered_seek_defers_to_read() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    {
        let mut writer = IndexedWriter::open(options(&store), indexer(&store).await)
            .await
            .unwrap();
        for n in 1..=30 {
            writer.write(block(n)).await.unwrap();
        }
        writer.close().await.unwrap();
    }

    let builder = filter_builder(&store);
    let reader = Reader::open(options(&store)).await.unwrap();
    // every block matches: value n occurs at block n-1 and block n
    let filter = builder.or(vec![builder.eq("all", "7"), builder.eq("all", "20")]);
    let mut filtered = FilteredReader::new(reader, filter);

    filtered.seek(10).await.unwrap();
    let got = filtered.read().await.unwrap().unwrap();
    assert_eq!(got.number, 19);
    let got = filtered.read().await.unwrap().unwrap();
    assert_eq!(got.number, 20);
    assert!(filtered.read().await.unwrap().is_none());
}
