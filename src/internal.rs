use crate::codec::{self, Value};
use crate::error::Error;
use crate::journal::{encode_transaction, program_transaction};
use crate::platform::Platform;
use crate::raw::{BANK_HEADER_SIZE_WITH_CRC, BankHeader, BankSelector, read_aligned, write_aligned};
use crate::recovery::Replay;
use crate::schema::ItemDef;
use crate::{ActiveBank, BootState, ItemId, Store, migration, recovery};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::mem;
#[cfg(feature = "defmt")]
use defmt::trace;
#[cfg(feature = "defmt")]
use defmt::warn;

/// Committed state of one bank.
struct Loaded {
    replay: Replay,
    table: BTreeMap<ItemId, Vec<u8>>,
    deprecated: BTreeMap<ItemId, Vec<u8>>,
}

impl<T: Platform> Store<T> {
    pub(crate) fn load(&mut self, migrations: &[migration::Migration<'_>]) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load");

        #[cfg(feature = "debug-logs")]
        println!("internal: load");

        let (first, first_hint) = self.read_bank_header(BankSelector::First)?;
        let (second, second_hint) = self.read_bank_header(BankSelector::Second)?;

        let Some(choice) = recovery::choose_bank(first, second) else {
            #[cfg(feature = "defmt")]
            warn!("no valid bank, starting from defaults");

            #[cfg(feature = "debug-logs")]
            println!("internal: load: no valid bank, starting from defaults");

            // damaged headers still tell how far the sequence got
            let sequence_id = first_hint
                .max(second_hint)
                .and_then(|seen| seen.checked_add(1))
                .unwrap_or(1);

            self.boot_state = BootState::ColdStart;
            return self.write_snapshot::<&[u8]>(BankSelector::First, sequence_id, &[]);
        };
        self.highest_sequence_id = choice.header.sequence_id;

        let (mut bank, mut header) = (choice.bank, choice.header);

        #[cfg(feature = "debug-logs")]
        println!("internal: load: using {bank} bank: {header:?}");

        let mut loaded = self.replay_bank(bank)?;
        let mut corrupted = false;
        if let Some(fallback) = choice.fallback
            && loaded.replay.is_corrupted()
        {
            #[cfg(feature = "defmt")]
            warn!("{} bank is corrupted, falling back to the {} bank", bank, bank.other());

            #[cfg(feature = "debug-logs")]
            println!(
                "internal: load: {bank} bank is corrupted, falling back to the {} bank",
                bank.other()
            );

            bank = bank.other();
            header = fallback;
            loaded = self.replay_bank(bank)?;
            corrupted = true;
        }

        self.table = loaded.table;
        self.deprecated = loaded.deprecated;
        self.active = ActiveBank {
            bank,
            header,
            cursor: self.layout.transactions_offset() + loaded.replay.end,
            transactions: loaded.replay.transactions,
        };

        let migrated =
            migration::run(migrations, &self.schema, &mut self.table, &self.deprecated)?;

        let outdated =
            migrated || header.version != self.schema.version() || !self.deprecated.is_empty();
        self.boot_state = if corrupted {
            BootState::CorruptedBank
        } else if !loaded.replay.clean_tail {
            BootState::TruncatedTail
        } else if outdated {
            BootState::Migrated
        } else {
            BootState::ValidStart
        };

        #[cfg(feature = "debug-logs")]
        println!(
            "internal: load: {} after {} transactions",
            self.boot_state, loaded.replay.transactions
        );

        // programming is only possible on erased memory, so a dirty tail has to go before the
        // next append. A corrupted bank has to be replaced before it wins the next boot again.
        if corrupted || !loaded.replay.clean_tail || outdated {
            self.compact_with::<&[u8]>(&[])?;
        }

        Ok(())
    }

    /// Replays the transaction area of `bank`, sorting records into live and deprecated items.
    fn replay_bank(&mut self, bank: BankSelector) -> Result<Loaded, Error> {
        let area = read_aligned(
            &mut self.hal,
            self.layout.bank_address(bank) + self.layout.transactions_offset(),
            self.layout.transaction_capacity(),
        )
        .map_err(|_| Error::FlashError)?;

        let schema = &self.schema;
        let mut table = BTreeMap::new();
        let mut deprecated = BTreeMap::new();
        let replay = recovery::replay(&area, T::crc32, |id, data| match schema.get(id) {
            Some(item) if item.width() != data.len() => {
                #[cfg(feature = "defmt")]
                warn!("skipping {} with {} bytes instead of {}", id, data.len(), item.width());

                #[cfg(feature = "debug-logs")]
                println!(
                    "internal: load: skipping {id:?} with {} bytes instead of {}",
                    data.len(),
                    item.width()
                );
            }
            Some(item) if item.is_deprecated() => {
                deprecated.insert(id, data.to_vec());
            }
            Some(_) => {
                table.insert(id, data.to_vec());
            }
            None => {
                #[cfg(feature = "defmt")]
                trace!("ignoring unknown {}", id);

                #[cfg(feature = "debug-logs")]
                println!("internal: load: ignoring unknown {id:?}");
            }
        });

        Ok(Loaded {
            replay,
            table,
            deprecated,
        })
    }

    /// The header if it passes its CRC check, and the sequence id it carries if it was written at
    /// all.
    fn read_bank_header(
        &mut self,
        bank: BankSelector,
    ) -> Result<(Option<BankHeader>, Option<u32>), Error> {
        let raw = read_aligned(
            &mut self.hal,
            self.layout.bank_address(bank),
            BANK_HEADER_SIZE_WITH_CRC,
        )
        .map_err(|_| Error::FlashError)?;

        let header = BankHeader::from_bytes(&raw, T::crc32);
        let hint = BankHeader::sequence_hint(&raw);
        if header.is_none() && hint.is_some() {
            #[cfg(feature = "defmt")]
            warn!("{} bank header failed its CRC check", bank);

            #[cfg(feature = "debug-logs")]
            println!("internal: {bank} bank header failed its CRC check");
        }
        Ok((header, hint))
    }

    pub(crate) fn item(&self, id: ItemId) -> Result<&ItemDef, Error> {
        self.schema.live(id).ok_or(Error::UnknownItem(id))
    }

    pub(crate) fn check_width(&self, id: ItemId, len: usize) -> Result<&ItemDef, Error> {
        let item = self.item(id)?;
        if item.width() != len {
            return Err(Error::LengthMismatch {
                id,
                expected: item.width(),
                actual: len,
            });
        }
        Ok(item)
    }

    pub(crate) fn encode_value(&self, id: ItemId, value: &Value) -> Result<Vec<u8>, Error> {
        codec::encode(self.item(id)?.layout(), value)
    }

    pub(crate) fn write_transaction<D: AsRef<[u8]>>(
        &mut self,
        items: &[(ItemId, D)],
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_transaction: {} items", items.len());

        #[cfg(feature = "debug-logs")]
        println!("internal: write_transaction: {} items", items.len());

        if items.is_empty() {
            return Err(Error::EmptyTransaction);
        }
        for (id, data) in items {
            self.check_width(*id, data.as_ref().len())?;
        }

        if items.iter().all(|(id, data)| {
            self.get_raw(*id)
                .is_ok_and(|current| current == data.as_ref())
        }) {
            #[cfg(feature = "debug-logs")]
            println!("internal: write_transaction: all values unchanged");

            return Ok(());
        }

        let bytes = encode_transaction(items, T::crc32)?;
        if bytes.len() > self.layout.transaction_capacity() {
            return Err(Error::TransactionTooLarge);
        }

        if self.active.cursor + bytes.len() > self.layout.bank_size {
            #[cfg(feature = "debug-logs")]
            println!(
                "internal: write_transaction: {} bytes left, compacting",
                self.layout.bank_size - self.active.cursor
            );

            return self.compact_with(items);
        }

        let address = self.layout.bank_address(self.active.bank) + self.active.cursor;
        program_transaction(&mut self.hal, address, &bytes)?;

        self.active.cursor += bytes.len();
        self.active.transactions += 1;
        for (id, data) in items {
            self.table.insert(*id, data.as_ref().to_vec());
        }

        Ok(())
    }

    /// Rewrites the current state, with `overlay` applied on top, into the standby bank.
    pub(crate) fn compact_with<D: AsRef<[u8]>>(
        &mut self,
        overlay: &[(ItemId, D)],
    ) -> Result<(), Error> {
        let target = self.active.bank.other();
        let sequence_id = self
            .highest_sequence_id
            .checked_add(1)
            .ok_or(Error::SequenceExhausted)?;

        self.write_snapshot(target, sequence_id, overlay)
    }

    /// Writes every live item into `bank` as a single transaction. The bank header is programmed
    /// last; until then the previous bank stays authoritative.
    fn write_snapshot<D: AsRef<[u8]>>(
        &mut self,
        bank: BankSelector,
        sequence_id: u32,
        overlay: &[(ItemId, D)],
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_snapshot: {} seq {}", bank, sequence_id);

        #[cfg(feature = "debug-logs")]
        println!("internal: write_snapshot: {bank} seq {sequence_id}");

        let snapshot: Vec<(ItemId, Vec<u8>)> = self
            .schema
            .live_items()
            .map(|item| {
                let id = item.id();
                let data = overlay
                    .iter()
                    .rev()
                    .find(|(staged, _)| *staged == id)
                    .map(|(_, data)| data.as_ref())
                    .or_else(|| self.table.get(&id).map(Vec::as_slice))
                    .unwrap_or(item.default_bytes());
                (id, data.to_vec())
            })
            .collect();

        let body = if snapshot.is_empty() {
            Vec::new()
        } else {
            encode_transaction(&snapshot, T::crc32)?
        };
        if BANK_HEADER_SIZE_WITH_CRC + body.len() > self.layout.bank_size {
            return Err(Error::BankOverflow);
        }

        let header = BankHeader {
            sequence_id,
            version: self.schema.version(),
        };
        let address = self.layout.bank_address(bank);

        self.hal
            .erase(address as u32, (address + self.layout.bank_size) as u32)
            .map_err(|_| Error::FlashError)?;
        write_aligned(
            &mut self.hal,
            address + self.layout.transactions_offset(),
            &body,
        )
        .map_err(|_| Error::FlashError)?;
        write_aligned(&mut self.hal, address, &header.to_bytes(T::crc32))
            .map_err(|_| Error::FlashError)?;

        self.active = ActiveBank {
            bank,
            header,
            cursor: self.layout.transactions_offset() + body.len(),
            transactions: usize::from(!body.is_empty()),
        };
        self.highest_sequence_id = self.highest_sequence_id.max(sequence_id);
        self.table = snapshot.into_iter().collect();

        Ok(())
    }

    /// Writes the defaults into the standby bank, then erases the previously active one.
    pub(crate) fn erase_all(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_all");

        #[cfg(feature = "debug-logs")]
        println!("internal: erase_all");

        let previous = self.active.bank;
        let table = mem::take(&mut self.table);
        if let Err(e) = self.compact_with::<&[u8]>(&[]) {
            self.table = table;
            return Err(e);
        }
        self.deprecated.clear();

        let address = self.layout.bank_address(previous);
        self.hal
            .erase(address as u32, (address + self.layout.bank_size) as u32)
            .map_err(|_| Error::FlashError)
    }
}
