use state_machines::state_machine;

state_machine! {
    name: RecordMachine,
    state: RecordState,
    initial: Ready,
    states: [Ready, Enriched, Validated, Reconciled, Failed],
    events {
        enrich { transition: { from: Ready, to: Enriched } }
        validate { transition: { from: Enriched, to: Validated } }
        reconcile { transition: { from: Validated, to: Reconciled } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Enriched, to: Failed }
            transition: { from: Validated, to: Failed }
            transition: { from: Reconciled, to: Failed }
        }
    }
}

pub fn ready() -> RecordMachine<(), Ready> {
    RecordMachine::new(())
}
