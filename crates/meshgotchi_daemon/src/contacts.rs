//! Registro de contatos: pares vistos por advert ou comando.

use meshgotchi_core::store::ContactStore;
use meshgotchi_core::{Contact, NodeId, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

pub struct ContactRegistry {
    known: Mutex<HashMap<NodeId, Contact>>,
    store: Arc<dyn ContactStore>,
}

impl ContactRegistry {
    /// Carrega os contatos persistidos. Falha de leitura começa vazio.
    pub fn load(store: Arc<dyn ContactStore>) -> Self {
        let known = match store.load_contacts() {
            Ok(list) => {
                info!("{} contato(s) carregado(s)", list.len());
                list.into_iter().map(|c| (c.node.clone(), c)).collect()
            }
            Err(e) => {
                warn!("Não foi possível carregar contatos: {e}");
                HashMap::new()
            }
        };
        Self {
            known: Mutex::new(known),
            store,
        }
    }

    /// Registra um avistamento. Retorna `true` se o nó é novo.
    ///
    /// O nome só é sobrescrito quando o advert traz um.
    pub fn upsert(&self, node: &NodeId, name: Option<&str>, now: Timestamp) -> bool {
        let mut known = self.lock();

        let first = !known.contains_key(node);
        let contact = known.entry(node.clone()).or_insert_with(|| Contact {
            node: node.clone(),
            name: None,
            first_seen: now,
            last_seen: now,
        });
        contact.last_seen = contact.last_seen.max(now);
        if let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) {
            contact.name = Some(name.to_string());
        }

        if first {
            info!("Novo contato: {node}{}", name.map(|n| format!(" ({n})")).unwrap_or_default());
        }
        if let Err(e) = self.store.save_contact(contact) {
            warn!("Falha ao persistir contato {node}: {e}");
        }
        first
    }

    /// Contatos do mais recente ao mais antigo.
    pub fn list(&self) -> Vec<Contact> {
        let mut list: Vec<Contact> = self.lock().values().cloned().collect();
        list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.node.cmp(&b.node)));
        list
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// O mapa continua consistente mesmo se um upsert entrou em pânico:
    /// cada entrada é escrita de uma vez.
    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, Contact>> {
        self.known.lock().unwrap_or_else(|poisoned| {
            warn!("Mutex dos contatos envenenado, recuperando");
            poisoned.into_inner()
        })
    }
}
