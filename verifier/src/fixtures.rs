use serde_json::json;

// a stone proof cut down to what the header and the digest read
pub fn proof(layout: &str, pow_hash: &str) -> String {
    json!({
        "proof_parameters": {
            "stark": { "log_n_cosets": 2 },
            "pow_hash": pow_hash,
            "commitment_hash": format!("{pow_hash}_masked160_lsb"),
        },
        "public_input": {
            "layout": layout,
            "n_steps": 16,
            "memory_segments": {
                "program": { "begin_addr": 1, "stop_ptr": 3 },
                "execution": { "begin_addr": 3, "stop_ptr": 10 },
                "output": { "begin_addr": 10, "stop_ptr": 12 },
            },
            "public_memory": [
                { "address": 1, "value": "0x40780017fff7fff", "page": 0 },
                { "address": 2, "value": "0x1", "page": 0 },
                { "address": 11, "value": "0x7", "page": 0 },
                { "address": 10, "value": "0x2a", "page": 0 },
            ],
        },
        "proof_hex": "0xdeadbeef",
    })
    .to_string()
}
