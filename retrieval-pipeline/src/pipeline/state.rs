use state_machines::state_machine;

state_machine! {
    name: RetrievalMachine,
    state: RetrievalState,
    initial: EmbeddingQuery,
    states: [EmbeddingQuery, Searching, Done, Failed],
    events {
        search { transition: { from: EmbeddingQuery, to: Searching } }
        complete { transition: { from: Searching, to: Done } }
        fail {
            transition: { from: EmbeddingQuery, to: Failed }
            transition: { from: Searching, to: Failed }
        }
    }
}

pub fn embedding_query() -> RetrievalMachine<(), EmbeddingQuery> {
    RetrievalMachine::new(())
}
