use crate::common::{EEPROM_SIZE, Eeprom, NOZZLE_TEMP, PRINTER_NAME, id, open};
use journal_store::error::Error;
use journal_store::{BankSelector, BootState};
use pretty_assertions::assert_eq;

mod common;

const FIRST_BANK: usize = 0x500;
const SECOND_BANK: usize = FIRST_BANK + 0xD80;
/// Bytes of the failing write that make it to the memory.
const TORN_WRITES: [usize; 4] = [0, 1, 4, 9];

type State = (u16, String);

fn state(eeprom: &mut Eeprom) -> State {
    let store = open(eeprom).unwrap();
    (
        store.get::<u16>(id(NOZZLE_TEMP)).unwrap(),
        store.get::<String>(id(PRINTER_NAME)).unwrap(),
    )
}

/// Runs `action` on a copy of `base` once for every memory operation it performs, with a power
/// loss at that operation, and checks that a reboot sees either the old or the new state.
fn assert_power_loss_safe(base: &Eeprom, action: fn(&mut Eeprom) -> Result<(), Error>) {
    let old = state(&mut base.clone());

    let mut complete = base.fork_with_fault(usize::MAX, 0);
    action(&mut complete).unwrap();
    let total = complete.operations.len();
    let new = state(&mut complete);
    println!("{total} operations, {old:?} -> {new:?}");

    for fail_after in 0..total {
        for torn in TORN_WRITES {
            println!("power loss at #{fail_after}, {torn} bytes torn");
            let mut eeprom = base.fork_with_fault(fail_after, torn);
            assert!(action(&mut eeprom).is_err());

            eeprom.disable_faults();
            let after = state(&mut eeprom);
            assert!(
                after == old || after == new,
                "power loss at #{fail_after} ({torn} bytes torn): {after:?}"
            );

            // the store keeps working after the repair
            let mut store = open(&mut eeprom).unwrap();
            store.set(id(NOZZLE_TEMP), 111u16).unwrap();
            assert_eq!(state(&mut eeprom).0, 111);
        }
    }
}

fn prepared() -> Eeprom {
    let mut eeprom = Eeprom::new(EEPROM_SIZE);
    let mut store = open(&mut eeprom).unwrap();
    store.set(id(NOZZLE_TEMP), 200u16).unwrap();
    store.set(id(PRINTER_NAME), "Before").unwrap();
    drop(store);
    eeprom
}

#[test]
fn power_loss_during_transaction() {
    assert_power_loss_safe(&prepared(), |eeprom| {
        let mut store = open(eeprom)?;
        let mut tx = store.transaction();
        tx.set(id(NOZZLE_TEMP), 250u16)?;
        tx.set(id(PRINTER_NAME), "After")?;
        tx.commit()
    });
}

#[test]
fn power_loss_during_compaction() {
    assert_power_loss_safe(&prepared(), |eeprom| {
        let mut store = open(eeprom)?;
        store.compact()?;
        // a change after the compaction makes the new bank distinguishable
        store.set(id(NOZZLE_TEMP), 222u16)
    });
}

#[test]
fn power_loss_during_auto_compaction() {
    let mut base = prepared();
    let mut store = open(&mut base).unwrap();
    let mut temp = 0u16;
    while store.statistics().free_bytes >= 9 {
        temp += 1;
        store.set(id(NOZZLE_TEMP), temp).unwrap();
    }
    drop(store);

    assert_power_loss_safe(&base, |eeprom| {
        let mut store = open(eeprom)?;
        store.set(id(NOZZLE_TEMP), 999u16)?;
        assert_eq!(store.statistics().sequence_id, 2);
        Ok(())
    });
}

#[test]
fn power_loss_during_reset() {
    let mut base = prepared();
    let mut store = open(&mut base).unwrap();
    store.set(id(NOZZLE_TEMP), 100u16).unwrap();
    store.compact().unwrap();
    store.set(id(NOZZLE_TEMP), 180u16).unwrap();
    // the standby bank still holds 100
    assert_eq!(store.statistics().active_bank, BankSelector::Second);
    drop(store);

    assert_power_loss_safe(&base, |eeprom| {
        let mut store = open(eeprom)?;
        store.reset()
    });
}

#[test]
fn old_bank_survives_interrupted_compaction() {
    let base = prepared();

    // 3 reads while opening, then erase, body and header of the new bank
    for fail_after in 3..6 {
        let mut eeprom = base.fork_with_fault(fail_after, 4);
        let mut store = open(&mut eeprom).unwrap();
        assert_eq!(store.compact(), Err(Error::FlashError));
        drop(store);

        eeprom.disable_faults();
        let store = open(&mut eeprom).unwrap();
        assert_eq!(store.boot_state(), BootState::ValidStart);
        assert_eq!(store.statistics().sequence_id, 1);
        assert_eq!(store.statistics().active_bank, BankSelector::First);
        assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 200);
    }
}

#[test]
fn corrupted_transaction_crc() {
    let mut eeprom = prepared();
    let mut store = open(&mut eeprom).unwrap();
    store.set(id(NOZZLE_TEMP), 201u16).unwrap();
    let used = store.statistics().used_bytes;
    drop(store);

    let end = FIRST_BANK + used;
    for byte in &mut eeprom.buf[end - 4..end] {
        *byte ^= 0x5A;
    }

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::TruncatedTail);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 200);
    assert_eq!(store.get::<String>(id(PRINTER_NAME)).unwrap(), "Before");
    // the dirty tail was compacted away
    assert_eq!(store.statistics().sequence_id, 2);
    assert_eq!(store.statistics().active_bank, BankSelector::Second);
    drop(store);

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::ValidStart);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 200);
}

#[test]
fn truncated_at_every_byte() {
    let before = prepared();
    let used_before = open(&mut before.clone()).unwrap().statistics().used_bytes;

    let mut after = before.clone();
    let mut store = open(&mut after).unwrap();
    let mut tx = store.transaction();
    tx.set(id(NOZZLE_TEMP), 201u16).unwrap();
    tx.set(id(PRINTER_NAME), "Cut").unwrap();
    tx.commit().unwrap();
    let used_after = store.statistics().used_bytes;
    drop(store);

    let start = FIRST_BANK + used_before;
    let end = FIRST_BANK + used_after;
    for cut in 0..end - start {
        // missing bytes that read as erased anyway
        if after.buf[start + cut..end].iter().all(|&b| b == 0xFF) {
            continue;
        }
        let mut eeprom = before.clone();
        eeprom.buf[start..start + cut].copy_from_slice(&after.buf[start..start + cut]);

        let store = open(&mut eeprom).unwrap();
        let expected = if cut == 0 {
            BootState::ValidStart
        } else {
            BootState::TruncatedTail
        };
        assert_eq!(store.boot_state(), expected, "cut at {cut}");
        assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 200);
        assert_eq!(store.get::<String>(id(PRINTER_NAME)).unwrap(), "Before");
    }

    let store = open(&mut after).unwrap();
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 201);
    assert_eq!(store.get::<String>(id(PRINTER_NAME)).unwrap(), "Cut");
}

#[test]
fn corrupted_newest_bank_falls_back() {
    let mut eeprom = prepared();
    let mut store = open(&mut eeprom).unwrap();
    store.set(id(NOZZLE_TEMP), 250u16).unwrap();
    store.compact().unwrap();
    drop(store);

    // a flipped bit in the snapshot of the second bank
    eeprom.buf[SECOND_BANK + 15] ^= 0x01;

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::CorruptedBank);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 250);
    assert_eq!(store.get::<String>(id(PRINTER_NAME)).unwrap(), "Before");
    // the corrupted bank was replaced by a fresh snapshot
    assert_eq!(store.statistics().active_bank, BankSelector::Second);
    assert_eq!(store.statistics().sequence_id, 3);
    drop(store);

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::ValidStart);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 250);
}

#[test]
fn corrupted_bank_without_fallback() {
    let mut eeprom = prepared();
    eeprom.buf[FIRST_BANK + 15] ^= 0x01;

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::TruncatedTail);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 215);
    assert_eq!(store.statistics().sequence_id, 2);
}

#[test]
fn cold_start_continues_the_sequence() {
    let mut eeprom = prepared();
    let mut store = open(&mut eeprom).unwrap();
    store.compact().unwrap();
    store.compact().unwrap();
    assert_eq!(store.statistics().sequence_id, 3);
    drop(store);

    // both header CRCs are damaged, the sequence ids are still readable
    eeprom.buf[FIRST_BANK + 9] ^= 0x01;
    eeprom.buf[SECOND_BANK + 9] ^= 0x01;

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::ColdStart);
    assert_eq!(store.statistics().sequence_id, 4);
    assert_eq!(store.statistics().active_bank, BankSelector::First);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 215);
}

#[test]
fn corrupted_bank_headers() {
    let mut eeprom = prepared();
    eeprom.buf[FIRST_BANK] ^= 0x01;

    let store = open(&mut eeprom).unwrap();
    assert_eq!(store.boot_state(), BootState::ColdStart);
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 215);
    assert_eq!(store.get::<String>(id(PRINTER_NAME)).unwrap(), "Printer");
    assert_eq!(store.statistics().sequence_id, 1);
}

#[test]
fn faulted_store_refuses_writes() {
    let base = prepared();
    // the three reads while opening succeed
    let mut eeprom = base.fork_with_fault(3, 0);

    let mut store = open(&mut eeprom).unwrap();
    assert_eq!(store.set(id(NOZZLE_TEMP), 1u16), Err(Error::FlashError));
    assert_eq!(store.set(id(NOZZLE_TEMP), 2u16), Err(Error::FlashError));
    assert_eq!(store.compact(), Err(Error::FlashError));
    assert_eq!(store.reset(), Err(Error::FlashError));
    // reads are served from the mirror, which only changes on success
    assert_eq!(store.get::<u16>(id(NOZZLE_TEMP)).unwrap(), 200);
}
