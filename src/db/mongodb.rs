use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::ReturnDocument;
use mongodb::{Client, ClientSession, Collection, Cursor, Database};
use serde::de::DeserializeOwned;
use super::models::{Reservation, ReservationStatus, Restaurant, Table};
use crate::api::{AppError, ResultExt};
use crate::config::Config;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone)]
pub struct MongoRepo {
    pub client: Client,
    pub database: Database,
}

impl MongoRepo {
    pub async fn init(config: &Config) -> Result<MongoRepo> {
        let client = Client::with_uri_str(&config.mongodb_uri)
            .await
            .map_err(|e| AppError::Internal(format!("Error connecting to MongoDB: {}", e)))?;

        let database = client.database(&config.mongodb_database);

        // Comprobar la conexión antes de devolver el repositorio
        database
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| AppError::Internal(format!("Error validating MongoDB connection: {}", e)))?;

        tracing::info!(database = %config.mongodb_database, "MongoDB connection established");

        Ok(MongoRepo { client, database })
    }

    pub fn restaurants(&self) -> Collection<Restaurant> {
        self.database.collection("restaurants")
    }

    pub fn tables(&self) -> Collection<Table> {
        self.database.collection("tables")
    }

    pub fn reservations(&self) -> Collection<Reservation> {
        self.database.collection("reservations")
    }

    pub async fn create_indexes(&self) -> Result<()> {
        use mongodb::{options::IndexOptions, IndexModel};

        let table_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "restaurantId": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "restaurantId": 1, "tableNumber": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        ];

        self.tables()
            .create_indexes(table_indexes)
            .await
            .map_err_db_operation("create_table_indexes")?;

        let reservation_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "restaurantId": 1, "reservationDate": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "tableIds": 1, "reservationDate": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "customerId": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "status": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "holdsReleased": 1 })
                .build(),
        ];

        self.reservations()
            .create_indexes(reservation_indexes)
            .await
            .map_err_db_operation("create_reservation_indexes")?;

        tracing::info!("MongoDB indexes created");
        Ok(())
    }

    pub fn current_timestamp() -> i64 {
        chrono::Utc::now().timestamp()
    }

    // ---------------------------------------------------------------------
    // Restaurantes y mesas
    // ---------------------------------------------------------------------

    pub async fn find_restaurant(&self, id: ObjectId) -> Result<Restaurant> {
        self.restaurants()
            .find_one(doc! { "_id": id })
            .await
            .map_err_db_operation("find_restaurant")?
            .ok_or_else(|| AppError::not_found_id("Restaurant", &id.to_hex()))
    }

    pub async fn list_restaurants(&self) -> Result<Vec<Restaurant>> {
        let cursor = self
            .restaurants()
            .find(doc! {})
            .await
            .map_err_db_operation("list_restaurants")?;
        collect(cursor, "list_restaurants").await
    }

    pub async fn tables_for_restaurant(&self, restaurant_id: ObjectId) -> Result<Vec<Table>> {
        let cursor = self
            .tables()
            .find(doc! { "restaurantId": restaurant_id })
            .await
            .map_err_db_operation("tables_for_restaurant")?;
        collect(cursor, "tables_for_restaurant").await
    }

    pub async fn find_table(&self, id: ObjectId) -> Result<Table> {
        self.tables()
            .find_one(doc! { "_id": id })
            .await
            .map_err_db_operation("find_table")?
            .ok_or_else(|| AppError::not_found_id("Table", &id.to_hex()))
    }

    /// Inserta una mesa y añade su id a la lista del restaurante en la misma transacción
    pub async fn insert_table(&self, table: &Table) -> Result<ObjectId> {
        let mut session = self.begin("create_table").await?;
        let outcome = self.write_new_table(&mut session, table).await;
        finish(session, "create_table", outcome).await
    }

    async fn write_new_table(&self, session: &mut ClientSession, table: &Table) -> Result<ObjectId> {
        let duplicate = self
            .tables()
            .find_one(doc! {
                "restaurantId": table.restaurant_id,
                "tableNumber": &table.table_number,
            })
            .session(&mut *session)
            .await
            .map_err_db_operation("check_table_number")?;

        if duplicate.is_some() {
            return Err(AppError::Conflict(format!(
                "Table number {} already exists for this restaurant.",
                table.table_number
            )));
        }

        let inserted = self
            .tables()
            .insert_one(table)
            .session(&mut *session)
            .await
            .map_err_db_operation("insert_table")?;
        let table_id = inserted_object_id(&inserted.inserted_id)?;

        let linked = self
            .restaurants()
            .update_one(
                doc! { "_id": table.restaurant_id },
                doc! { "$addToSet": { "tables": table_id } },
            )
            .session(&mut *session)
            .await
            .map_err_db_operation("link_table_to_restaurant")?;

        if linked.matched_count == 0 {
            return Err(AppError::not_found_id("Restaurant", &table.restaurant_id.to_hex()));
        }

        Ok(table_id)
    }

    /// Aplica `changes` (un documento `$set`) y devuelve la mesa actualizada
    pub async fn update_table(&self, id: ObjectId, mut changes: Document) -> Result<Table> {
        changes.insert("updatedAt", Self::current_timestamp());

        self.tables()
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": changes })
            .return_document(ReturnDocument::After)
            .await
            .map_err_db_operation("update_table")?
            .ok_or_else(|| AppError::not_found_id("Table", &id.to_hex()))
    }

    /// Borra una mesa y la desvincula de su restaurante
    pub async fn delete_table(&self, id: ObjectId) -> Result<Table> {
        let mut session = self.begin("delete_table").await?;
        let outcome = self.write_table_removal(&mut session, id).await;
        finish(session, "delete_table", outcome).await
    }

    async fn write_table_removal(&self, session: &mut ClientSession, id: ObjectId) -> Result<Table> {
        let table = self
            .tables()
            .find_one_and_delete(doc! { "_id": id })
            .session(&mut *session)
            .await
            .map_err_db_operation("delete_table")?
            .ok_or_else(|| AppError::not_found_id("Table", &id.to_hex()))?;

        self.restaurants()
            .update_one(
                doc! { "_id": table.restaurant_id },
                doc! { "$pull": { "tables": id } },
            )
            .session(&mut *session)
            .await
            .map_err_db_operation("unlink_table_from_restaurant")?;

        Ok(table)
    }

    /// Borra todas las mesas de un restaurante y vacía su lista de mesas
    pub async fn clear_tables(&self, restaurant_id: ObjectId) -> Result<u64> {
        let mut session = self.begin("clear_tables").await?;
        let outcome = self.write_clear_tables(&mut session, restaurant_id).await;
        finish(session, "clear_tables", outcome).await
    }

    async fn write_clear_tables(&self, session: &mut ClientSession, restaurant_id: ObjectId) -> Result<u64> {
        let linked = self
            .restaurants()
            .update_one(
                doc! { "_id": restaurant_id },
                doc! { "$set": { "tables": [] } },
            )
            .session(&mut *session)
            .await
            .map_err_db_operation("unlink_all_tables")?;

        if linked.matched_count == 0 {
            return Err(AppError::not_found_id("Restaurant", &restaurant_id.to_hex()));
        }

        let deleted = self
            .tables()
            .delete_many(doc! { "restaurantId": restaurant_id })
            .session(&mut *session)
            .await
            .map_err_db_operation("clear_tables")?;

        Ok(deleted.deleted_count)
    }

    // ---------------------------------------------------------------------
    // Reservas
    // ---------------------------------------------------------------------

    /// Reservas Pending/Confirmed de una fecha, de un restaurante o de todos
    pub async fn active_reservations_on(
        &self,
        restaurant_id: Option<ObjectId>,
        date: &str,
    ) -> Result<Vec<Reservation>> {
        let mut filter = doc! {
            "reservationDate": date,
            "status": { "$in": ReservationStatus::active_names() },
        };
        if let Some(restaurant_id) = restaurant_id {
            filter.insert("restaurantId", restaurant_id);
        }
        self.list_reservations(filter).await
    }

    pub async fn list_reservations(&self, filter: Document) -> Result<Vec<Reservation>> {
        let cursor = self
            .reservations()
            .find(filter)
            .sort(doc! { "reservationDate": -1, "startTime": -1 })
            .await
            .map_err_db_operation("list_reservations")?;
        collect(cursor, "list_reservations").await
    }

    pub async fn find_reservation(&self, id: ObjectId) -> Result<Option<Reservation>> {
        self.reservations()
            .find_one(doc! { "_id": id })
            .await
            .map_err_db_operation("find_reservation")
    }

    /// Persiste una reserva asignada y añade un bloqueo a cada una de sus mesas.
    ///
    /// Todo ocurre en una transacción. Para cada mesa se comprueba que no haya
    /// una reserva activa solapada (las de mesa concreta no dejan bloqueo) y
    /// el `$push` del bloqueo sólo se aplica si la mesa no tiene ya uno solapado
    /// en esa fecha. Si alguna mesa falla se devuelve `TableConflict` y no
    /// queda nada escrito.
    pub async fn insert_reservation_with_holds(&self, reservation: &Reservation) -> Result<ObjectId> {
        let mut session = self.begin("create_reservation").await?;
        let outcome = self.write_reservation_with_holds(&mut session, reservation).await;
        finish(session, "create_reservation", outcome).await
    }

    async fn write_reservation_with_holds(
        &self,
        session: &mut ClientSession,
        reservation: &Reservation,
    ) -> Result<ObjectId> {
        for table_id in &reservation.table_ids {
            let clash = self
                .reservations()
                .find_one(overlapping_active_reservations(reservation, &[*table_id]))
                .session(&mut *session)
                .await
                .map_err_db_operation("check_reservation_overlap")?;

            if clash.is_some() {
                return Err(AppError::TableConflict { table_id: table_id.to_hex() });
            }
        }

        let inserted = self
            .reservations()
            .insert_one(reservation)
            .session(&mut *session)
            .await
            .map_err_db_operation("insert_reservation")?;
        let reservation_id = inserted_object_id(&inserted.inserted_id)?;

        self.push_holds(session, reservation).await?;
        Ok(reservation_id)
    }

    /// Añade el bloqueo de la reserva a cada una de sus mesas, sólo si la mesa
    /// no tiene ya un bloqueo solapado. Cada `$push` sube `bookingVersion`.
    async fn push_holds(&self, session: &mut ClientSession, reservation: &Reservation) -> Result<()> {
        let hold = doc! {
            "isAvailable": false,
            "date": &reservation.reservation_date,
            "startTime": &reservation.start_time,
            "endTime": &reservation.end_time,
        };

        for table_id in &reservation.table_ids {
            let mut filter = doc! { "_id": *table_id };
            filter.extend(no_overlapping_hold(reservation));

            let pushed = self
                .tables()
                .update_one(
                    filter,
                    doc! {
                        "$push": { "availability": hold.clone() },
                        "$inc": { "bookingVersion": 1 },
                        "$set": { "updatedAt": Self::current_timestamp() },
                    },
                )
                .session(&mut *session)
                .await
                .map_err_db_operation("append_table_hold")?;

            if pushed.matched_count == 0 {
                return Err(AppError::TableConflict { table_id: table_id.to_hex() });
            }
        }

        Ok(())
    }

    /// Persiste una reserva sobre una mesa concreta, sin bloqueo.
    ///
    /// La mesa se toca (`bookingVersion`) dentro de la transacción para que
    /// dos peticiones simultáneas sobre la misma mesa no puedan confirmar ambas.
    pub async fn insert_reservation_for_table(&self, reservation: &Reservation) -> Result<ObjectId> {
        let mut session = self.begin("create_table_reservation").await?;
        let outcome = self.write_reservation_for_table(&mut session, reservation).await;
        finish(session, "create_table_reservation", outcome).await
    }

    async fn write_reservation_for_table(
        &self,
        session: &mut ClientSession,
        reservation: &Reservation,
    ) -> Result<ObjectId> {
        for table_id in &reservation.table_ids {
            let mut filter = doc! { "_id": *table_id };
            filter.extend(no_overlapping_hold(reservation));

            let touched = self
                .tables()
                .update_one(filter, doc! { "$inc": { "bookingVersion": 1 } })
                .session(&mut *session)
                .await
                .map_err_db_operation("touch_table")?;

            if touched.matched_count == 0 {
                return Err(AppError::TableConflict { table_id: table_id.to_hex() });
            }
        }

        let clash = self
            .reservations()
            .find_one(overlapping_active_reservations(reservation, &reservation.table_ids))
            .session(&mut *session)
            .await
            .map_err_db_operation("check_reservation_overlap")?;

        if clash.is_some() {
            return Err(AppError::Conflict(
                "The table is already reserved for this time slot.".to_string(),
            ));
        }

        let inserted = self
            .reservations()
            .insert_one(reservation)
            .session(&mut *session)
            .await
            .map_err_db_operation("insert_reservation")?;

        inserted_object_id(&inserted.inserted_id)
    }

    /// `Pending`/`Confirmed` -> `Cancelled`. No toca los bloqueos de las mesas.
    pub async fn cancel_reservation(&self, id: ObjectId) -> Result<Reservation> {
        let cancelled = self
            .reservations()
            .find_one_and_update(
                doc! {
                    "_id": id,
                    "status": { "$in": ReservationStatus::active_names() },
                },
                doc! {
                    "$set": {
                        "status": ReservationStatus::Cancelled.as_str(),
                        "updatedAt": Self::current_timestamp(),
                    }
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err_db_operation("cancel_reservation")?;

        if let Some(reservation) = cancelled {
            return Ok(reservation);
        }

        match self.find_reservation(id).await? {
            Some(existing) if existing.status.can_transition_to(ReservationStatus::Cancelled) => Err(
                AppError::Conflict("Reservation changed while cancelling, try again.".to_string()),
            ),
            Some(existing) => Err(AppError::Conflict(format!(
                "Reservation is already {} and cannot be cancelled.",
                existing.status
            ))),
            None => Err(AppError::not_found_id("Reservation", &id.to_hex())),
        }
    }

    /// `Pending` -> `Confirmed`, y el bloqueo de su mesa, en una transacción.
    ///
    /// Si la mesa ya tiene un bloqueo solapado no se confirma nada y se
    /// devuelve `Conflict`.
    pub async fn confirm_reservation(&self, id: ObjectId) -> Result<Reservation> {
        let mut session = self.begin("confirm_reservation").await?;
        let outcome = self.write_confirmation(&mut session, id).await;
        let confirmed = finish(session, "confirm_reservation", outcome)
            .await
            .map_err(|e| {
                if e.is_write_conflict() {
                    AppError::Conflict("The table is already reserved for this time slot.".to_string())
                } else {
                    e
                }
            })?;

        if let Some(reservation) = confirmed {
            return Ok(reservation);
        }

        match self.find_reservation(id).await? {
            Some(existing) if existing.status.can_transition_to(ReservationStatus::Confirmed) => Err(
                AppError::Conflict("Reservation changed while confirming, try again.".to_string()),
            ),
            Some(existing) => Err(AppError::Conflict(format!(
                "Reservation is {} and cannot be confirmed.",
                existing.status
            ))),
            None => Err(AppError::not_found_id("Reservation", &id.to_hex())),
        }
    }

    async fn write_confirmation(&self, session: &mut ClientSession, id: ObjectId) -> Result<Option<Reservation>> {
        let confirmed = self
            .reservations()
            .find_one_and_update(
                doc! { "_id": id, "status": ReservationStatus::Pending.as_str() },
                doc! {
                    "$set": {
                        "status": ReservationStatus::Confirmed.as_str(),
                        "holdsPlaced": true,
                        "updatedAt": Self::current_timestamp(),
                    }
                },
            )
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err_db_operation("confirm_reservation")?;

        if let Some(reservation) = &confirmed {
            self.push_holds(session, reservation).await?;
        }
        Ok(confirmed)
    }

    /// Borra la reserva. No toca los bloqueos de las mesas.
    pub async fn delete_reservation(&self, id: ObjectId) -> Result<Reservation> {
        self.reservations()
            .find_one_and_delete(doc! { "_id": id })
            .await
            .map_err_db_operation("delete_reservation")?
            .ok_or_else(|| AppError::not_found_id("Reservation", &id.to_hex()))
    }

    // ---------------------------------------------------------------------
    // Barrido de expiración
    // ---------------------------------------------------------------------

    /// Reservas cuyos bloqueos todavía no se han retirado
    pub async fn releasable_reservations(&self) -> Result<Vec<Reservation>> {
        let cursor = self
            .reservations()
            .find(doc! {
                "holdsReleased": { "$ne": true },
                "status": { "$ne": ReservationStatus::Completed.as_str() },
            })
            .await
            .map_err_db_operation("releasable_reservations")?;
        collect(cursor, "releasable_reservations").await
    }

    /// Retira de una mesa el bloqueo exacto `{date, startTime, endTime}`. Idempotente.
    pub async fn release_hold(&self, table_id: ObjectId, date: &str, start_time: &str, end_time: &str) -> Result<u64> {
        let result = self
            .tables()
            .update_one(
                doc! { "_id": table_id },
                doc! {
                    "$pull": { "availability": hold_matcher(date, start_time, end_time) },
                    "$set": { "updatedAt": Self::current_timestamp() },
                },
            )
            .await
            .map_err_db_operation("release_hold")?;
        Ok(result.modified_count)
    }

    /// Pasa a `Completed` y marca `holdsReleased`, sólo si la reserva sigue
    /// activa. Devuelve `true` si se completó.
    pub async fn complete_reservation(&self, id: ObjectId) -> Result<bool> {
        let completed = self
            .reservations()
            .update_one(
                doc! {
                    "_id": id,
                    "status": { "$in": ReservationStatus::active_names() },
                },
                doc! {
                    "$set": {
                        "status": ReservationStatus::Completed.as_str(),
                        "holdsReleased": true,
                        "updatedAt": Self::current_timestamp(),
                    }
                },
            )
            .await
            .map_err_db_operation("complete_reservation")?;
        Ok(completed.matched_count > 0)
    }

    /// Marca `holdsReleased` sin tocar el estado
    pub async fn mark_holds_released(&self, id: ObjectId) -> Result<()> {
        self.reservations()
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "holdsReleased": true, "updatedAt": Self::current_timestamp() } },
            )
            .await
            .map_err_db_operation("mark_holds_released")?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transacciones
    // ---------------------------------------------------------------------

    async fn begin(&self, operation: &str) -> Result<ClientSession> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err_db_operation(operation)?;
        session
            .start_transaction()
            .await
            .map_err_db_operation(operation)?;
        Ok(session)
    }
}

/// Confirma la transacción si `outcome` es correcto y la aborta en otro caso
async fn finish<T>(mut session: ClientSession, operation: &str, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            session
                .commit_transaction()
                .await
                .map_err_db_operation(operation)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(abort_error) = session.abort_transaction().await {
                tracing::warn!(
                    operation = %operation,
                    error = %abort_error,
                    "Failed to abort transaction"
                );
            }
            Err(e)
        }
    }
}

/// Filtro que excluye mesas con un bloqueo solapado con la reserva en su fecha
fn no_overlapping_hold(reservation: &Reservation) -> Document {
    doc! {
        "availability": {
            "$not": {
                "$elemMatch": {
                    "isAvailable": false,
                    "date": &reservation.reservation_date,
                    "startTime": { "$lt": &reservation.end_time },
                    "endTime": { "$gt": &reservation.start_time },
                }
            }
        }
    }
}

/// Reservas activas sobre alguna de `table_ids` que se solapan con la franja de `reservation`
fn overlapping_active_reservations(reservation: &Reservation, table_ids: &[ObjectId]) -> Document {
    doc! {
        "tableIds": { "$in": table_ids.to_vec() },
        "reservationDate": &reservation.reservation_date,
        "startTime": { "$lt": &reservation.end_time },
        "endTime": { "$gt": &reservation.start_time },
        "status": { "$in": ReservationStatus::active_names() },
    }
}

/// Bloqueo exacto que puso una reserva; en una mesa no hay dos bloqueos solapados
fn hold_matcher(date: &str, start_time: &str, end_time: &str) -> Document {
    doc! {
        "isAvailable": false,
        "date": date,
        "startTime": start_time,
        "endTime": end_time,
    }
}

fn inserted_object_id(id: &mongodb::bson::Bson) -> Result<ObjectId> {
    id.as_object_id()
        .ok_or_else(|| AppError::internal_trace("Inserted document has no ObjectId", None))
}

async fn collect<T>(mut cursor: Cursor<T>, operation: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned + Send + Sync,
{
    let mut results = Vec::new();
    while cursor.advance().await.map_err_db_operation(operation)? {
        results.push(cursor.deserialize_current().map_err_db_operation(operation)?);
    }
    Ok(results)
}
