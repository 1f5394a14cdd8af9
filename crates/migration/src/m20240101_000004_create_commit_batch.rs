use sea_orm_migration::prelude::*;

use crate::utils::exec;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Applies a list of writes in the caller's transaction, so a PostgREST RPC
/// call commits all of them or none. Runs as the invoker: row level security
/// still applies to every write.
///
/// Each write is `{"op": "set"|"update"|"delete", "table", "id", "fields", "merge"}`.
const COMMIT_BATCH: &str = r#"
CREATE OR REPLACE FUNCTION public.commit_batch(writes jsonb)
RETURNS void
LANGUAGE plpgsql
SECURITY INVOKER
AS $$
DECLARE
    w jsonb;
    tbl text;
    doc jsonb;
    cols text;
    updates text;
    affected integer;
BEGIN
    FOR w IN SELECT * FROM jsonb_array_elements(writes) LOOP
        tbl := w->>'table';
        IF tbl NOT IN ('users', 'projects', 'items') THEN
            RAISE EXCEPTION 'unknown table %', tbl USING ERRCODE = '22023';
        END IF;

        IF w->>'op' = 'delete' THEN
            EXECUTE format('DELETE FROM public.%I WHERE id = $1', tbl) USING w->>'id';
            CONTINUE;
        END IF;

        doc := coalesce(w->'fields', '{}'::jsonb) - 'id' - 'created_at';
        SELECT string_agg(format('%I', k), ', '),
               string_agg(format('%1$I = EXCLUDED.%1$I', k), ', ')
          INTO cols, updates
          FROM jsonb_object_keys(doc) AS k;

        IF w->>'op' = 'update' THEN
            IF cols IS NULL THEN
                CONTINUE;
            END IF;
            EXECUTE format(
                'UPDATE public.%1$I SET (%2$s) = (SELECT %2$s FROM jsonb_populate_record(NULL::public.%1$I, $1)) WHERE id = $2',
                tbl, cols
            ) USING doc, w->>'id';
            GET DIAGNOSTICS affected = ROW_COUNT;
            IF affected = 0 THEN
                RAISE EXCEPTION 'document not found: %/%', tbl, w->>'id' USING ERRCODE = 'P0002';
            END IF;
        ELSIF w->>'op' = 'set' THEN
            IF NOT coalesce((w->>'merge')::boolean, false) THEN
                EXECUTE format('DELETE FROM public.%I WHERE id = $1', tbl) USING w->>'id';
            END IF;
            doc := doc || jsonb_build_object('id', w->>'id');
            cols := coalesce(cols || ', ', '') || 'id';
            EXECUTE format(
                'INSERT INTO public.%1$I (%2$s) SELECT %2$s FROM jsonb_populate_record(NULL::public.%1$I, $1) ON CONFLICT (id) DO %3$s',
                tbl, cols, CASE WHEN updates IS NULL THEN 'NOTHING' ELSE 'UPDATE SET ' || updates END
            ) USING doc;
        ELSE
            RAISE EXCEPTION 'unknown op %', w->>'op' USING ERRCODE = '22023';
        END IF;
    END LOOP;
END;
$$;
"#;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        exec(manager, COMMIT_BATCH).await?;
        exec(
            manager,
            "GRANT EXECUTE ON FUNCTION public.commit_batch(jsonb) TO authenticated;",
        )
        .await?;
        println!(" -> Function 'commit_batch' created.");
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        exec(manager, "DROP FUNCTION IF EXISTS public.commit_batch(jsonb);").await
    }
}
