use google_cloud_bigquery::http::table::{
    TableFieldMode, TableFieldSchema, TableFieldType, TableSchema,
};

pub fn log_schema() -> TableSchema {
    let fields = vec![
        TableFieldSchema {
            name: "id".to_string(),
            data_type: TableFieldType::String,
            mode: Some(TableFieldMode::Required),
            description: Some("keccak256 of block number, transaction index and log index".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "block_number".to_string(),
            data_type: TableFieldType::Integer,
            mode: Some(TableFieldMode::Required),
            description: Some("Number of the block containing the log".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "tx_index".to_string(),
            data_type: TableFieldType::Integer,
            mode: Some(TableFieldMode::Required),
            description: Some("Index of the transaction in the block".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "log_index".to_string(),
            data_type: TableFieldType::Integer,
            mode: Some(TableFieldMode::Required),
            description: Some("Index of the log in the block".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "removed".to_string(),
            data_type: TableFieldType::Boolean,
            mode: Some(TableFieldMode::Required),
            description: Some("Whether the log was removed by a reorganization".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "address".to_string(),
            data_type: TableFieldType::String,
            mode: Some(TableFieldMode::Required),
            description: Some("Address of the contract that emitted the log".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "signature".to_string(),
            data_type: TableFieldType::String,
            mode: Some(TableFieldMode::Nullable),
            description: Some("First topic (event selector), null for anonymous logs".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "args".to_string(),
            data_type: TableFieldType::Record,
            mode: Some(TableFieldMode::Repeated),
            fields: Some(vec![
                TableFieldSchema {
                    name: "c".to_string(),
                    data_type: TableFieldType::Integer,
                    mode: Some(TableFieldMode::Repeated),
                    description: Some("Coefficient digits in base 10^14 limbs".to_string()),
                    ..Default::default()
                },
                TableFieldSchema {
                    name: "e".to_string(),
                    data_type: TableFieldType::Integer,
                    mode: Some(TableFieldMode::Required),
                    description: Some("Decimal exponent of the leading digit".to_string()),
                    ..Default::default()
                },
            ]),
            description: Some("Indexed topics after the signature, then 32-byte data words".to_string()),
            ..Default::default()
        },
        TableFieldSchema {
            name: "data_index_start".to_string(),
            data_type: TableFieldType::Integer,
            mode: Some(TableFieldMode::Nullable),
            description: Some("Position in args where data words begin".to_string()),
            ..Default::default()
        },
    ];

    TableSchema { fields }
}
